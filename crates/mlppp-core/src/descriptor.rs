//! The readiness-set descriptor capability.
//!
//! Every component that owns a file or socket handle (the bundle's tunnel,
//! the admin server's listener, each datalink, each admin session)
//! implements [`Descriptor`]. Once per iteration the multiplexer asks each
//! descriptor to register interest in an [`FdSets`], waits, and then hands
//! the resulting [`ReadySet`]s back to whichever descriptors are ready.

use std::collections::BTreeSet;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::trace;

use crate::event::EventQueue;

/// A participant in readiness-based multiplexing.
pub trait Descriptor {
    /// Register read and/or write interest for every handle this descriptor
    /// currently owns. Returns the number of handles registered.
    fn update_set<'fd>(&'fd self, sets: &mut FdSets<'fd>) -> usize;

    /// Whether any handle of this descriptor is in `ready`.
    fn is_set(&self, ready: &ReadySet) -> bool;

    /// Perform at most one bounded read side effect.
    fn read(&mut self, ready: &ReadySet, events: &mut EventQueue);

    /// Perform at most one bounded write side effect.
    fn write(&mut self, ready: &ReadySet, events: &mut EventQueue);
}

/// Interest collected for one readiness query.
///
/// Borrows the registered handles, so no descriptor can be mutated (or
/// dropped) while the query is being built or waited on.
#[derive(Debug, Default)]
pub struct FdSets<'fd> {
    entries: Vec<(BorrowedFd<'fd>, PollFlags)>,
}

impl<'fd> FdSets<'fd> {
    /// Create an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Ask to be told when `fd` is readable.
    pub fn watch_read(&mut self, fd: BorrowedFd<'fd>) {
        self.watch(fd, PollFlags::POLLIN);
    }

    /// Ask to be told when `fd` is writable.
    pub fn watch_write(&mut self, fd: BorrowedFd<'fd>) {
        self.watch(fd, PollFlags::POLLOUT);
    }

    fn watch(&mut self, fd: BorrowedFd<'fd>, flags: PollFlags) {
        let raw = fd.as_raw_fd();
        if let Some((_, existing)) = self.entries.iter_mut().find(|(f, _)| f.as_raw_fd() == raw) {
            existing.insert(flags);
        } else {
            self.entries.push((fd, flags));
        }
    }

    /// Number of distinct handles registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handle is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `fd` has read interest registered.
    #[must_use]
    pub fn wants_read(&self, fd: RawFd) -> bool {
        self.flags(fd).contains(PollFlags::POLLIN)
    }

    /// Whether `fd` has write interest registered.
    #[must_use]
    pub fn wants_write(&self, fd: RawFd) -> bool {
        self.flags(fd).contains(PollFlags::POLLOUT)
    }

    fn flags(&self, fd: RawFd) -> PollFlags {
        self.entries
            .iter()
            .find(|(f, _)| f.as_raw_fd() == fd)
            .map_or(PollFlags::empty(), |(_, flags)| *flags)
    }

    /// Block until at least one registered handle is ready or `timeout`
    /// elapses (`None` waits forever).
    ///
    /// An interrupted wait reports nothing ready.
    ///
    /// # Errors
    ///
    /// Returns the underlying `poll(2)` error.
    pub fn wait(self, timeout: Option<Duration>) -> io::Result<Ready> {
        let mut fds: Vec<PollFd<'fd>> = self
            .entries
            .iter()
            .map(|(fd, flags)| PollFd::new(*fd, *flags))
            .collect();

        let timeout = timeout.map_or(PollTimeout::NONE, |d| {
            PollTimeout::from(u16::try_from(d.as_millis()).unwrap_or(u16::MAX))
        });

        match poll(&mut fds, timeout) {
            Ok(n) => trace!(ready = n, watched = fds.len(), "poll returned"),
            Err(Errno::EINTR) => return Ok(Ready::default()),
            Err(e) => return Err(e.into()),
        }

        let mut ready = Ready::default();
        for (pfd, (fd, _)) in fds.iter().zip(&self.entries) {
            let revents = pfd.revents().unwrap_or_else(PollFlags::empty);
            let raw = fd.as_raw_fd();
            if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
                ready.readable.insert(raw);
            }
            if revents.intersects(PollFlags::POLLOUT | PollFlags::POLLERR) {
                ready.writable.insert(raw);
            }
        }
        Ok(ready)
    }
}

/// Handles reported ready for one kind of I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadySet(BTreeSet<RawFd>);

impl ReadySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `fd` ready.
    pub fn insert(&mut self, fd: RawFd) {
        self.0.insert(fd);
    }

    /// Whether `fd` is ready.
    #[must_use]
    pub fn contains(&self, fd: RawFd) -> bool {
        self.0.contains(&fd)
    }

    /// Number of ready handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of one readiness query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ready {
    /// Handles with pending input (or hangup/error).
    pub readable: ReadySet,
    /// Handles that accept output.
    pub writable: ReadySet,
}

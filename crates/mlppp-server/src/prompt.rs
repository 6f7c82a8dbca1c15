//! Admin sessions.
//!
//! A [`Prompt`] owns one accepted connection. Input is split into lines;
//! each non-empty line becomes an [`Event::Command`] for the daemon to
//! execute. Output is buffered and written one bounded chunk per write
//! callback; a session is not read while too much of its output is unsent.
//! Line editing is left to the operator's terminal.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use mlppp_core::{BoundedText, Descriptor, Event, EventQueue, FdSets, PromptId, ReadySet};
use tracing::{debug, info};

use crate::policy::Origin;

/// Printed whenever a session is ready for the next command.
pub const PROMPT: &str = "mlppp> ";

/// Session display names hold at most 64 bytes.
pub type SessionName = BoundedText<64>;

/// Unsent output at which a session stops being read.
pub const MAX_PENDING_OUTPUT: usize = 16_384;

/// Unsent output beyond which further output is dropped.
pub const MAX_OUTPUT: usize = 65_536;

const READ_CHUNK: usize = 512;
const MAX_LINE: usize = 1024;

/// An accepted admin connection.
#[derive(Debug)]
pub enum Connection {
    /// Over the filesystem socket.
    Local(UnixStream),
    /// Over TCP.
    Tcp(TcpStream),
}

impl Connection {
    /// Switch the connection to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Propagates the `fcntl` failure.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Local(s) => s.set_nonblocking(nonblocking),
            Self::Tcp(s) => s.set_nonblocking(nonblocking),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Local(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Local(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Local(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Local(s) => s.as_fd(),
            Self::Tcp(s) => s.as_fd(),
        }
    }
}

/// How a session treats its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Not yet handed to the operator; input is discarded.
    Pending,
    /// Lines are commands.
    Command,
}

/// One admin session.
pub struct Prompt {
    id: PromptId,
    origin: Origin,
    from: SessionName,
    conn: Connection,
    mode: PromptMode,
    required: bool,
    closing: bool,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("from", &self.from)
            .field("mode", &self.mode)
            .field("pending_output", &self.outbuf.len())
            .finish_non_exhaustive()
    }
}

impl Prompt {
    /// Wrap an accepted connection. The connection should already be
    /// non-blocking.
    #[must_use]
    pub fn new(id: PromptId, origin: Origin, from: &str, conn: Connection) -> Self {
        Self {
            id,
            origin,
            from: SessionName::new(from),
            conn,
            mode: PromptMode::Pending,
            required: false,
            closing: false,
            inbuf: Vec::new(),
            outbuf: Vec::new(),
        }
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> PromptId {
        self.id
    }

    /// `local` or `tcp`.
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Socket path or `address:port`.
    #[must_use]
    pub fn peer_name(&self) -> &str {
        &self.from
    }

    /// Input mode.
    #[must_use]
    pub fn mode(&self) -> PromptMode {
        self.mode
    }

    /// Whether the daemon must dispose of this session before its server.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether the session is on its way out.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Start treating input as commands and show the prompt.
    pub fn command_mode(&mut self) {
        self.mode = PromptMode::Command;
        self.show_prompt();
    }

    /// Mark the session as required.
    pub fn set_required(&mut self) {
        self.required = true;
    }

    /// Queue output. Anything past [`MAX_OUTPUT`] unsent bytes is dropped.
    pub fn print(&mut self, text: &str) {
        let room = MAX_OUTPUT.saturating_sub(self.outbuf.len());
        let bytes = text.as_bytes();
        if bytes.len() > room {
            debug!(
                prompt = %self.id,
                dropped = bytes.len().saturating_sub(room),
                "session output full"
            );
        }
        self.outbuf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn backlogged(&self) -> bool {
        self.outbuf.len() >= MAX_PENDING_OUTPUT
    }

    /// Queue the prompt.
    pub fn show_prompt(&mut self) {
        self.print(PROMPT);
    }

    /// Bytes waiting to be written.
    #[must_use]
    pub fn pending_output(&self) -> usize {
        self.outbuf.len()
    }

    /// Flush what is queued, then end the session.
    pub fn finish(&mut self) {
        self.closing = true;
    }

    fn take_lines(&mut self, events: &mut EventQueue) {
        while let Some(pos) = self.inbuf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.inbuf.drain(..=pos).collect();
            self.submit(&raw[..pos], events);
        }
        if self.inbuf.len() >= MAX_LINE {
            let raw = std::mem::take(&mut self.inbuf);
            self.submit(&raw, events);
        }
    }

    fn submit(&mut self, raw: &[u8], events: &mut EventQueue) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            self.show_prompt();
            return;
        }
        debug!(prompt = %self.id, line, "command");
        events.push(Event::Command {
            prompt: self.id,
            line: line.to_owned(),
        });
    }

    fn hang_up(&mut self, events: &mut EventQueue) {
        if !self.closing {
            info!(prompt = %self.id, origin = %self.origin, from = %self.from, "session closed");
        }
        self.closing = true;
        events.push(Event::SessionClosed { prompt: self.id });
    }
}

impl Descriptor for Prompt {
    fn update_set<'fd>(&'fd self, sets: &mut FdSets<'fd>) -> usize {
        if !self.closing && !self.backlogged() {
            sets.watch_read(self.conn.as_fd());
        }
        if self.closing || !self.outbuf.is_empty() {
            sets.watch_write(self.conn.as_fd());
        }
        1
    }

    fn is_set(&self, ready: &ReadySet) -> bool {
        ready.contains(self.conn.as_fd().as_raw_fd())
    }

    fn read(&mut self, _ready: &ReadySet, events: &mut EventQueue) {
        if self.closing || self.backlogged() {
            return;
        }
        let mut buf = [0u8; READ_CHUNK];
        match self.conn.read(&mut buf) {
            Ok(0) => self.hang_up(events),
            Ok(n) => {
                if self.mode == PromptMode::Command {
                    self.inbuf.extend_from_slice(&buf[..n]);
                    self.take_lines(events);
                }
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {},
            Err(e) => {
                debug!(prompt = %self.id, error = %e, "session read failed");
                self.hang_up(events);
            },
        }
    }

    fn write(&mut self, _ready: &ReadySet, events: &mut EventQueue) {
        if !self.outbuf.is_empty() {
            match self.conn.write(&self.outbuf) {
                Ok(n) => {
                    self.outbuf.drain(..n.min(self.outbuf.len()));
                },
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) =>
                {
                    return;
                },
                Err(e) => {
                    debug!(prompt = %self.id, error = %e, "session write failed");
                    self.outbuf.clear();
                    self.hang_up(events);
                    return;
                },
            }
        }
        if self.closing && self.outbuf.is_empty() {
            events.push(Event::SessionClosed { prompt: self.id });
        }
    }
}

//! The event multiplexer.
//!
//! Pure dispatch: collect every live descriptor, build one readiness query,
//! wait, then call `read`/`write` on whichever descriptors are ready. The
//! multiplexer never sees concrete types, only [`DescriptorId`] handles that
//! the [`DescriptorSet`] owner resolves.

use std::io;
use std::time::Duration;

use tracing::trace;

use crate::descriptor::{Descriptor, FdSets, Ready};
use crate::event::EventQueue;
use crate::ids::DescriptorId;

/// Owner of every descriptor the multiplexer services.
pub trait DescriptorSet {
    /// Live descriptors, in registration order.
    fn descriptor_ids(&self) -> Vec<DescriptorId>;

    /// Resolve a handle for interest registration.
    fn descriptor(&self, id: DescriptorId) -> Option<&dyn Descriptor>;

    /// Resolve a handle for dispatch.
    fn descriptor_mut(&mut self, id: DescriptorId) -> Option<&mut dyn Descriptor>;

    /// Apply whatever the last serviced descriptor queued that may be applied
    /// mid-iteration. Called after every dispatched descriptor so that a
    /// state change made by one is visible to those serviced after it.
    fn settle(&mut self, _events: &mut EventQueue) {}
}

/// Readiness multiplexer. Holds no domain state.
#[derive(Debug, Default)]
pub struct Multiplexer {
    iterations: u64,
}

impl Multiplexer {
    /// Create a multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed iterations.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run one iteration: register interest, wait up to `timeout`, dispatch.
    ///
    /// Descriptors are serviced in registration order. The list is taken
    /// once up front, so a descriptor created during dispatch is first
    /// serviced on the next iteration and one that disappears is skipped.
    /// Returns the number of read/write callbacks made.
    ///
    /// # Errors
    ///
    /// Returns the readiness wait error; no descriptor is dispatched then.
    pub fn iterate<S>(
        &mut self,
        set: &mut S,
        timeout: Option<Duration>,
        events: &mut EventQueue,
    ) -> io::Result<usize>
    where
        S: DescriptorSet + ?Sized,
    {
        let ids = set.descriptor_ids();

        let ready: Ready = {
            let shared: &S = set;
            let mut sets = FdSets::new();
            for id in &ids {
                if let Some(d) = shared.descriptor(*id) {
                    d.update_set(&mut sets);
                }
            }
            trace!(descriptors = ids.len(), handles = sets.len(), "waiting for readiness");
            sets.wait(timeout)?
        };

        let mut dispatched: usize = 0;
        for id in ids {
            let Some(d) = set.descriptor_mut(id) else {
                continue;
            };
            let mut serviced = false;
            if d.is_set(&ready.readable) {
                d.read(&ready.readable, events);
                dispatched = dispatched.saturating_add(1);
                serviced = true;
            }
            if d.is_set(&ready.writable) {
                d.write(&ready.writable, events);
                dispatched = dispatched.saturating_add(1);
                serviced = true;
            }
            if serviced {
                set.settle(events);
            }
        }

        self.iterations = self.iterations.saturating_add(1);
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ReadySet;
    use crate::event::{Event, LinkSignal};
    use crate::ids::{LinkId, PromptId};
    use std::io::{Read, Write};
    use std::os::fd::{AsFd, AsRawFd};
    use std::os::unix::net::UnixStream;

    /// Echo-less reader that records the order it was serviced in.
    struct Probe {
        name: &'static str,
        stream: UnixStream,
        log: std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>,
    }

    impl Descriptor for Probe {
        fn update_set<'fd>(&'fd self, sets: &mut FdSets<'fd>) -> usize {
            sets.watch_read(self.stream.as_fd());
            1
        }

        fn is_set(&self, ready: &ReadySet) -> bool {
            ready.contains(self.stream.as_raw_fd())
        }

        fn read(&mut self, _ready: &ReadySet, events: &mut EventQueue) {
            let mut buf = [0u8; 16];
            let _ = self.stream.read(&mut buf);
            self.log.borrow_mut().push(self.name);
            events.link(LinkId(0), LinkSignal::Established);
        }

        fn write(&mut self, _ready: &ReadySet, _events: &mut EventQueue) {}
    }

    struct Pair {
        first: Probe,
        second: Probe,
        settled: usize,
    }

    impl DescriptorSet for Pair {
        fn descriptor_ids(&self) -> Vec<DescriptorId> {
            vec![DescriptorId::Link(LinkId(1)), DescriptorId::Prompt(PromptId(1))]
        }

        fn descriptor(&self, id: DescriptorId) -> Option<&dyn Descriptor> {
            match id {
                DescriptorId::Link(_) => Some(&self.first),
                DescriptorId::Prompt(_) => Some(&self.second),
                DescriptorId::Bundle | DescriptorId::Server => None,
            }
        }

        fn descriptor_mut(&mut self, id: DescriptorId) -> Option<&mut dyn Descriptor> {
            match id {
                DescriptorId::Link(_) => Some(&mut self.first),
                DescriptorId::Prompt(_) => Some(&mut self.second),
                DescriptorId::Bundle | DescriptorId::Server => None,
            }
        }

        fn settle(&mut self, events: &mut EventQueue) {
            self.settled += events.drain().count();
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let (a, mut a_peer) = UnixStream::pair().unwrap();
        let (b, mut b_peer) = UnixStream::pair().unwrap();
        b_peer.write_all(b"b").unwrap();
        a_peer.write_all(b"a").unwrap();

        let mut pair = Pair {
            first: Probe {
                name: "first",
                stream: a,
                log: log.clone(),
            },
            second: Probe {
                name: "second",
                stream: b,
                log: log.clone(),
            },
            settled: 0,
        };

        let mut mux = Multiplexer::new();
        let mut events = EventQueue::new();
        let n = mux
            .iterate(&mut pair, Some(Duration::from_millis(500)), &mut events)
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert_eq!(pair.settled, 2);
        assert_eq!(mux.iterations(), 1);
    }

    #[test]
    fn test_idle_iteration_dispatches_nothing() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let (a, _a_peer) = UnixStream::pair().unwrap();
        let (b, _b_peer) = UnixStream::pair().unwrap();
        let mut pair = Pair {
            first: Probe {
                name: "first",
                stream: a,
                log: log.clone(),
            },
            second: Probe {
                name: "second",
                stream: b,
                log: log.clone(),
            },
            settled: 0,
        };

        let mut mux = Multiplexer::new();
        let mut events = EventQueue::new();
        let n = mux
            .iterate(&mut pair, Some(Duration::from_millis(10)), &mut events)
            .unwrap();
        assert_eq!(n, 0);
        assert!(log.borrow().is_empty());
        assert!(events.is_empty());
        assert!(!matches!(events.pop(), Some(Event::Command { .. })));
    }
}

//! Events raised by descriptors during dispatch.
//!
//! Descriptors only get `&mut self` while they are serviced, so anything
//! that has to reach the bundle or the server is queued here and applied by
//! the owner of the descriptor set.

use std::collections::VecDeque;

use crate::ids::{Layer, LinkId, PromptId};

/// Something a datalink learned from its device or protocol stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// Link-layer negotiation completed.
    Established,
    /// The peer passed authentication.
    Authenticated,
    /// The peer failed authentication.
    AuthFailed,
    /// A protocol layer came up.
    LayerUp(Layer),
    /// A protocol layer went down.
    LayerDown(Layer),
    /// A decoded network packet for the tunnel.
    Packet(Vec<u8>),
    /// The device went away underneath the link.
    Lost,
    /// The link finished closing.
    Closed,
}

/// One queued event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A datalink reported a signal.
    Link {
        /// Reporting link.
        link: LinkId,
        /// What happened.
        signal: LinkSignal,
    },
    /// An admin session submitted a command line.
    Command {
        /// Submitting session.
        prompt: PromptId,
        /// The line, without its terminator.
        line: String,
    },
    /// An admin session's peer went away.
    SessionClosed {
        /// The session.
        prompt: PromptId,
    },
}

impl Event {
    /// Whether applying the event may change descriptor membership, in which
    /// case it has to wait for the iteration boundary.
    #[must_use]
    pub fn changes_membership(&self) -> bool {
        matches!(self, Event::Command { .. } | Event::SessionClosed { .. })
    }
}

/// FIFO of pending events.
#[derive(Debug, Default)]
pub struct EventQueue(VecDeque<Event>);

impl EventQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, event: Event) {
        self.0.push_back(event);
    }

    /// Append a link signal.
    pub fn link(&mut self, link: LinkId, signal: LinkSignal) {
        self.push(Event::Link { link, signal });
    }

    /// Take the oldest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.0.pop_front()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove and return every queued event in order.
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.0.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = EventQueue::new();
        q.link(LinkId(1), LinkSignal::Established);
        q.push(Event::SessionClosed { prompt: PromptId(2) });
        assert_eq!(q.len(), 2);
        assert_eq!(
            q.pop(),
            Some(Event::Link {
                link: LinkId(1),
                signal: LinkSignal::Established
            })
        );
        assert!(matches!(q.pop(), Some(Event::SessionClosed { .. })));
        assert!(q.is_empty());
    }

    #[test]
    fn test_membership_classification() {
        let cmd = Event::Command {
            prompt: PromptId(0),
            line: "clean".into(),
        };
        let sig = Event::Link {
            link: LinkId(0),
            signal: LinkSignal::Lost,
        };
        assert!(cmd.changes_membership());
        assert!(!sig.changes_membership());
    }
}

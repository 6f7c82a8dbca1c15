//! Prelude module - commonly used test helpers.
//!
//! Use `use mlppp_test::prelude::*;` in integration tests.

pub use crate::fixtures::{auto_link, direct_link, ipv4_packet, test_bundle, test_settings};
pub use crate::harness::{setup_test_logging, test_dir};
pub use crate::mocks::{
    ManualClock, MemoryTunnel, Observed, RecordingObserver, ScriptedProtocol, SharedWriter,
};

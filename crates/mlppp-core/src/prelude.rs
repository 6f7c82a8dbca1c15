//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mlppp_core::prelude::*;` to import all essential types.

// Phase machine
pub use crate::Phase;

// Identifiers
pub use crate::{DescriptorId, Layer, LinkId, PromptId};

// Reactor
pub use crate::{Descriptor, DescriptorSet, FdSets, Multiplexer, Ready, ReadySet};

// Events
pub use crate::{Event, EventQueue, LinkSignal};

// Values
pub use crate::{BoundedText, PhysType};

// Time
pub use crate::{Clock, SystemClock};

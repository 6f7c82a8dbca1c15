//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mlppp_bundle::prelude::*;` to import all essential types.

// Controller
pub use crate::{Bundle, BundleSettings, CloseMode};

// Errors
pub use crate::{BundleError, BundleResult};

// Links
pub use crate::{Datalink, DatalinkCollection, Endpoint, LinkConfig, LinkProtocol, LinkState};

// Collaborators
pub use crate::{LayerObserver, PacketMatcher, RouteTable, Tunnel};

// Routing
pub use crate::{RouteChange, RouteGateway, RouteSeq, RouteSpec};

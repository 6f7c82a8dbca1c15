#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! mlppp Bundle - the aggregate session of the mlppp daemon.
//!
//! A [`Bundle`] combines one or more [`Datalink`]s behind one tunnel device
//! and drives the session phase from the signals those links raise:
//!
//! - [`Bundle::open`] / [`Bundle::close`] start and stop the session
//! - [`Bundle::handle_link_signal`] feeds link-layer and NCP events in
//! - entering `Network` installs routes stamped with the current
//!   [`RouteSeq`] and arms the [`IdleSupervisor`]; leaving it undoes both
//! - the [`DatalinkCollection`] supports clone, remove and clean
//!
//! Link framing, option negotiation and authentication live behind the
//! [`LinkProtocol`] trait; packet classification lives behind
//! [`PacketMatcher`]; the kernel routing table lives behind [`RouteTable`].

pub mod prelude;

pub mod collection;
pub mod controller;
pub mod datalink;
pub mod error;
pub mod filter;
pub mod idle;
pub mod ncp;
pub mod notify;
pub mod observer;
pub mod protocol;
pub mod route;
pub mod tunnel;

pub use collection::DatalinkCollection;
pub use controller::{
    AuthSettings, Bundle, BundleSettings, CloseMode, MAX_AUTH_LEN, MAX_HELD_PACKETS,
};
pub use datalink::{Datalink, Device, Endpoint, LinkConfig, LinkName, LinkState};
pub use error::{BundleError, BundleResult};
pub use filter::{
    Filter, FilterAction, FilterError, FilterRule, FilterSet, PacketMatcher, ProtocolMatcher,
    ProtocolPattern,
};
pub use idle::{IdleCheck, IdleSupervisor};
pub use ncp::Ncp;
pub use notify::Notifier;
pub use observer::LayerObserver;
pub use protocol::{LinkProtocol, NullProtocol};
pub use route::{
    MemoryRouteTable, RouteChange, RouteEntry, RouteError, RouteGateway, RouteSeq, RouteSpec,
    RouteTable,
};
pub use tunnel::{NullTunnel, TunDevice, Tunnel};

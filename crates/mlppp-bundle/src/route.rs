//! Route bookkeeping.
//!
//! Every route the bundle installs is stamped with a [`RouteSeq`]. A removal
//! names the sequence number of the installation it undoes, so a late
//! removal for a route that has since been reinstalled is ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteSeq(pub u32);

impl RouteSeq {
    /// The following sequence number.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for RouteSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a `set_route` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    /// Install a route.
    Add,
    /// Remove the route installed under the given sequence number.
    Delete(RouteSeq),
}

/// Gateway of a configured route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteGateway {
    /// The peer's negotiated address.
    Peer,
    /// A fixed address.
    Addr(Ipv4Addr),
}

impl FromStr for RouteGateway {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("hisaddr") {
            return Ok(Self::Peer);
        }
        s.parse()
            .map(Self::Addr)
            .map_err(|_| RouteError::BadGateway(s.to_owned()))
    }
}

impl fmt::Display for RouteGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer => f.write_str("HISADDR"),
            Self::Addr(a) => a.fmt(f),
        }
    }
}

/// A route installed whenever the bundle enters the network phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Destination network.
    pub dst: Ipv4Addr,
    /// Destination mask.
    pub mask: Ipv4Addr,
    /// Gateway.
    pub gateway: RouteGateway,
}

/// Route table errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The destination already has a route.
    #[error("route to {dst}/{mask} already exists")]
    Exists {
        /// Destination.
        dst: Ipv4Addr,
        /// Mask.
        mask: Ipv4Addr,
    },

    /// The destination has no route.
    #[error("no route to {dst}/{mask}")]
    NotFound {
        /// Destination.
        dst: Ipv4Addr,
        /// Mask.
        mask: Ipv4Addr,
    },

    /// A gateway string did not parse.
    #[error("invalid gateway '{0}' (expected HISADDR or an IPv4 address)")]
    BadGateway(String),

    /// The system table refused the change.
    #[error("routing table: {0}")]
    Table(String),
}

/// The system routing table, as far as the bundle needs it.
pub trait RouteTable: fmt::Debug + Send {
    /// Add a route.
    ///
    /// # Errors
    ///
    /// [`RouteError::Exists`] if the destination already has a route.
    fn add(&mut self, dst: Ipv4Addr, gateway: Ipv4Addr, mask: Ipv4Addr) -> Result<(), RouteError>;

    /// Delete a route.
    ///
    /// # Errors
    ///
    /// [`RouteError::NotFound`] if there is nothing to delete.
    fn delete(&mut self, dst: Ipv4Addr, mask: Ipv4Addr) -> Result<(), RouteError>;
}

/// In-process routing table.
///
/// Clones share the same table, so a caller can keep a handle to inspect
/// what the bundle installed.
#[derive(Debug, Clone, Default)]
pub struct MemoryRouteTable {
    routes: Arc<Mutex<BTreeMap<(Ipv4Addr, Ipv4Addr), Ipv4Addr>>>,
}

impl MemoryRouteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed routes as `(dst, mask, gateway)`.
    #[must_use]
    pub fn routes(&self) -> Vec<(Ipv4Addr, Ipv4Addr, Ipv4Addr)> {
        self.routes
            .lock()
            .map(|r| r.iter().map(|((d, m), g)| (*d, *m, *g)).collect())
            .unwrap_or_default()
    }

    /// Number of installed routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RouteTable for MemoryRouteTable {
    fn add(&mut self, dst: Ipv4Addr, gateway: Ipv4Addr, mask: Ipv4Addr) -> Result<(), RouteError> {
        let mut routes = self
            .routes
            .lock()
            .map_err(|e| RouteError::Table(e.to_string()))?;
        if routes.contains_key(&(dst, mask)) {
            return Err(RouteError::Exists { dst, mask });
        }
        routes.insert((dst, mask), gateway);
        Ok(())
    }

    fn delete(&mut self, dst: Ipv4Addr, mask: Ipv4Addr) -> Result<(), RouteError> {
        let mut routes = self
            .routes
            .lock()
            .map_err(|e| RouteError::Table(e.to_string()))?;
        routes
            .remove(&(dst, mask))
            .map(|_| ())
            .ok_or(RouteError::NotFound { dst, mask })
    }
}

/// One route the bundle believes it installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination.
    pub dst: Ipv4Addr,
    /// Mask.
    pub mask: Ipv4Addr,
    /// Gateway used.
    pub gateway: Ipv4Addr,
    /// Sequence number it was installed under.
    pub seq: RouteSeq,
}

/// Routes installed by the bundle, keyed by destination.
#[derive(Debug, Default)]
pub(crate) struct RouteBook {
    entries: BTreeMap<(Ipv4Addr, Ipv4Addr), RouteEntry>,
}

impl RouteBook {
    pub(crate) fn record(&mut self, entry: RouteEntry) {
        self.entries.insert((entry.dst, entry.mask), entry);
    }

    pub(crate) fn get(&self, dst: Ipv4Addr, mask: Ipv4Addr) -> Option<&RouteEntry> {
        self.entries.get(&(dst, mask))
    }

    pub(crate) fn forget(&mut self, dst: Ipv4Addr, mask: Ipv4Addr) -> Option<RouteEntry> {
        self.entries.remove(&(dst, mask))
    }

    /// Entries stamped at or after `since`.
    pub(crate) fn stamped_since(&self, since: RouteSeq) -> Vec<RouteEntry> {
        self.entries
            .values()
            .filter(|e| e.seq >= since)
            .copied()
            .collect()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

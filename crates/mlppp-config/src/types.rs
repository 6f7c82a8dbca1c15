//! Configuration types for the mlppp daemon.
//!
//! These types carry no dependency on the other mlppp crates. Link types,
//! endpoints, gateways and filter rules are kept as the strings an operator
//! writes; [`crate::validate`] checks their syntax and the daemon converts
//! them to domain types at startup. Every struct implements [`Default`] so
//! that a bare `[section]` header produces a working configuration.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

/// Name of the link every fresh configuration starts with.
pub const DEFAULT_LINK_NAME: &str = "deflink";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bundle and tunnel settings.
    pub bundle: BundleSection,
    /// Administrative server.
    pub server: ServerSection,
    /// Datalinks, in order.
    pub links: Vec<LinkSection>,
    /// Routes installed whenever the bundle reaches the network phase.
    pub routes: Vec<RouteSection>,
    /// Packet filters.
    pub filters: FiltersSection,
    /// Logging level, format and directives.
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bundle: BundleSection::default(),
            server: ServerSection::default(),
            links: vec![LinkSection::default()],
            routes: Vec::new(),
            filters: FiltersSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// BundleSection
// ---------------------------------------------------------------------------

/// How packets reach the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// A `/dev/tun<unit>` device.
    #[default]
    Device,
    /// No tunnel; packets from the links are discarded.
    None,
}

/// `[bundle]`
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BundleSection {
    /// Tunnel unit; the first free unit when unset.
    pub unit: Option<u32>,
    /// Tunnel kind.
    pub tunnel: TunnelKind,
    /// Idle timeout in seconds; `0` disables.
    pub idle_timeout: u32,
    /// Authentication name.
    pub auth_name: String,
    /// Authentication key. Never serialized.
    #[serde(skip_serializing)]
    pub auth_key: Option<String>,
    /// Path that receives one status line per phase change.
    pub notify: Option<PathBuf>,
    /// Require the multilink layer before the network layer counts as up.
    pub multilink: bool,
}

impl Default for BundleSection {
    fn default() -> Self {
        Self {
            unit: None,
            tunnel: TunnelKind::Device,
            idle_timeout: 180,
            auth_name: String::new(),
            auth_key: None,
            notify: None,
            multilink: false,
        }
    }
}

impl fmt::Debug for BundleSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSection")
            .field("unit", &self.unit)
            .field("tunnel", &self.tunnel)
            .field("idle_timeout", &self.idle_timeout)
            .field("auth_name", &self.auth_name)
            .field("has_auth_key", &self.auth_key.is_some())
            .field("notify", &self.notify)
            .field("multilink", &self.multilink)
            .finish()
    }
}

impl Serialize for BundleSection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BundleSection", 6)?;
        if let Some(unit) = self.unit {
            state.serialize_field("unit", &unit)?;
        } else {
            state.skip_field("unit")?;
        }
        state.serialize_field("tunnel", &self.tunnel)?;
        state.serialize_field("idle_timeout", &self.idle_timeout)?;
        state.serialize_field("auth_name", &self.auth_name)?;
        if let Some(notify) = &self.notify {
            state.serialize_field("notify", notify)?;
        } else {
            state.skip_field("notify")?;
        }
        state.serialize_field("multilink", &self.multilink)?;
        state.end()
    }
}

// ---------------------------------------------------------------------------
// ServerSection
// ---------------------------------------------------------------------------

/// `[server]`
///
/// `socket` and `port` are alternatives; when both are set the local socket
/// wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Local control socket path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
    /// Permission mode of the local socket as an octal string (`"0660"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_mode: Option<String>,
    /// TCP control port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Maximum concurrent admin sessions.
    pub max_sessions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            socket: None,
            socket_mode: None,
            port: None,
            max_sessions: 16,
        }
    }
}

impl ServerSection {
    /// The socket mode as a number, if one is configured.
    ///
    /// # Errors
    ///
    /// A validation error if the string is not an octal mode of at most
    /// `0777`.
    pub fn mode(&self) -> crate::ConfigResult<Option<u32>> {
        self.socket_mode.as_deref().map(parse_mode).transpose()
    }
}

fn parse_mode(raw: &str) -> crate::ConfigResult<u32> {
    let digits = raw.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    let mode = u32::from_str_radix(digits, 8).map_err(|_| {
        crate::ConfigError::invalid(
            "server.socket_mode",
            format!("'{raw}' is not an octal permission mode"),
        )
    })?;
    if mode > 0o777 {
        return Err(crate::ConfigError::invalid(
            "server.socket_mode",
            format!("'{raw}' has bits outside 0777"),
        ));
    }
    Ok(mode)
}

// ---------------------------------------------------------------------------
// LinkSection
// ---------------------------------------------------------------------------

/// One `[[links]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Link name, unique within the bundle.
    pub name: String,
    /// Physical type, e.g. `"auto"` or `"auto|ddial"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `tcp:host:port`, `unix:/path`, a device file, or `"none"`.
    pub device: String,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_LINK_NAME.to_owned(),
            kind: "interactive".to_owned(),
            device: "none".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// RouteSection
// ---------------------------------------------------------------------------

/// One `[[routes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSection {
    /// Destination network.
    pub dst: Ipv4Addr,
    /// Destination mask.
    #[serde(default = "default_mask")]
    pub mask: Ipv4Addr,
    /// `"hisaddr"` or an IPv4 address.
    #[serde(default = "default_gateway")]
    pub gateway: String,
}

fn default_mask() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_gateway() -> String {
    "hisaddr".to_owned()
}

// ---------------------------------------------------------------------------
// FiltersSection
// ---------------------------------------------------------------------------

/// `[filters]`: rule lists such as `["permit tcp", "deny any"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersSection {
    /// Packets arriving from the links.
    #[serde(rename = "in")]
    pub incoming: Vec<String>,
    /// Packets leaving through the links.
    #[serde(rename = "out")]
    pub outgoing: Vec<String>,
    /// Packets allowed to bring the bundle up on demand.
    pub dial: Vec<String>,
    /// Packets that count as activity for the idle timer.
    pub alive: Vec<String>,
}

impl FiltersSection {
    /// `(name, rules)` for every filter.
    #[must_use]
    pub fn named(&self) -> [(&'static str, &[String]); 4] {
        [
            ("in", &self.incoming),
            ("out", &self.outgoing),
            ("dial", &self.dial),
            ("alive", &self.alive),
        ]
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Extra filter directives, e.g. `"mlppp::phase=debug"`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

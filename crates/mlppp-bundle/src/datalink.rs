//! One physical or logical link of a bundle.

use std::collections::VecDeque;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mlppp_core::{BoundedText, Descriptor, EventQueue, FdSets, LinkId, LinkSignal, PhysType, ReadySet};
use nix::fcntl::OFlag;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BundleError, BundleResult};
use crate::protocol::LinkProtocol;

/// Link names are at most 20 bytes.
pub type LinkName = BoundedText<20>;

const READ_CHUNK: usize = 2048;

/// Upper bound on establishing a `tcp:` endpoint.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Anything a link can run over.
pub trait Device: Read + Write + AsFd + fmt::Debug + Send {}

impl<T: Read + Write + AsFd + fmt::Debug + Send> Device for T {}

/// Link-layer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Not in use.
    Closed,
    /// Device attached, negotiating.
    Opening,
    /// Negotiated and carrying traffic.
    Open,
    /// Shutting down.
    Closing,
    /// The device went away.
    Hangup,
}

impl LinkState {
    /// Display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            LinkState::Closed => "closed",
            LinkState::Opening => "opening",
            LinkState::Open => "open",
            LinkState::Closing => "closing",
            LinkState::Hangup => "hangup",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a link's device comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// No device; the link can only be attached to an existing handle.
    #[default]
    None,
    /// `tcp:host:port`
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// `unix:/path`
    Unix(PathBuf),
    /// A device file such as `/dev/cuaa0`.
    File(PathBuf),
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(Self::None);
        }
        if let Some(rest) = s.strip_prefix("tcp:") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| format!("'{s}': expected tcp:host:port"))?;
            if host.is_empty() {
                return Err(format!("'{s}': missing host"));
            }
            let port = port
                .parse()
                .map_err(|_| format!("'{s}': invalid port '{port}'"))?;
            return Ok(Self::Tcp {
                host: host.to_owned(),
                port,
            });
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(format!("'{s}': missing socket path"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        Ok(Self::File(PathBuf::from(s)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::None => f.write_str("none"),
            Endpoint::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Endpoint::Unix(p) => write!(f, "unix:{}", p.display()),
            Endpoint::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Link-layer configuration; copied when a link is cloned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    /// Physical type.
    pub phys_type: PhysType,
    /// Device source.
    pub endpoint: Endpoint,
}

impl Endpoint {
    /// Open the device. Every device comes back non-blocking.
    fn connect(&self) -> io::Result<Option<Box<dyn Device>>> {
        let device: Box<dyn Device> = match self {
            Endpoint::None => return Ok(None),
            Endpoint::Tcp { host, port } => Box::new(connect_tcp(host, *port)?),
            Endpoint::Unix(path) => {
                let s = UnixStream::connect(path)?;
                s.set_nonblocking(true)?;
                Box::new(s)
            },
            Endpoint::File(path) => Box::new(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .custom_flags(OFlag::O_NONBLOCK.bits())
                    .open(path)?,
            ),
        };
        Ok(Some(device))
    }
}

fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(s) => {
                s.set_nodelay(true)?;
                s.set_nonblocking(true)?;
                return Ok(s);
            },
            Err(e) => {
                debug!(%addr, error = %e, "connect failed");
                last_err = Some(e);
            },
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host}: no addresses"))
    }))
}

/// One link.
#[derive(Debug)]
pub struct Datalink {
    id: LinkId,
    name: LinkName,
    config: LinkConfig,
    state: LinkState,
    device: Option<Box<dyn Device>>,
    protocol: Box<dyn LinkProtocol>,
    outq: VecDeque<Vec<u8>>,
    stay_down: bool,
    up_since: Option<DateTime<Utc>>,
}

impl Datalink {
    /// A closed link.
    #[must_use]
    pub fn new(id: LinkId, name: LinkName, config: LinkConfig, protocol: Box<dyn LinkProtocol>) -> Self {
        Self {
            id,
            name,
            config,
            state: LinkState::Closed,
            device: None,
            protocol,
            outq: VecDeque::new(),
            stay_down: false,
            up_since: None,
        }
    }

    /// A closed link with `self`'s configuration and a fresh stack.
    #[must_use]
    pub fn duplicate(&self, id: LinkId, name: LinkName) -> Self {
        Self::new(id, name, self.config.clone(), self.protocol.duplicate())
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Physical type.
    #[must_use]
    pub fn phys_type(&self) -> PhysType {
        self.config.phys_type
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Carrying traffic.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Negotiating or carrying traffic.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, LinkState::Opening | LinkState::Open)
    }

    /// Not in use.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    /// When the link last came up.
    #[must_use]
    pub fn up_since(&self) -> Option<DateTime<Utc>> {
        self.up_since
    }

    /// Whether the link must not be redialled.
    #[must_use]
    pub fn stay_down(&self) -> bool {
        self.stay_down
    }

    /// Allow or forbid redialling.
    pub fn set_stay_down(&mut self, stay_down: bool) {
        self.stay_down = stay_down;
    }

    /// Packets waiting for the device.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.outq.len()
    }

    /// Attach an already-open device and start negotiation.
    pub fn attach(&mut self, device: Box<dyn Device>) -> Vec<LinkSignal> {
        debug!(link = %self.name, device = ?device, "device attached");
        self.device = Some(device);
        self.state = LinkState::Opening;
        self.protocol.start()
    }

    /// Connect the configured device and start negotiation. Does nothing
    /// unless the link is closed.
    ///
    /// # Errors
    ///
    /// [`BundleError::NoDevice`] if the link has no endpoint,
    /// [`BundleError::Device`] if connecting fails.
    pub fn open(&mut self) -> BundleResult<Vec<LinkSignal>> {
        if !self.is_closed() {
            return Ok(Vec::new());
        }
        let device = self
            .config
            .endpoint
            .connect()
            .map_err(|source| BundleError::Device {
                link: self.name.to_string(),
                source,
            })?
            .ok_or_else(|| BundleError::NoDevice(self.name.to_string()))?;
        info!(link = %self.name, endpoint = %self.config.endpoint, "link opening");
        Ok(self.attach(device))
    }

    /// Begin closing. Returns whatever the stack reports immediately.
    pub fn close(&mut self) -> Vec<LinkSignal> {
        if matches!(self.state, LinkState::Closed | LinkState::Closing) {
            return Vec::new();
        }
        self.state = LinkState::Closing;
        self.outq.clear();
        let signals = self.protocol.stop();
        self.device = None;
        signals
    }

    /// Update link state for a signal about to be handed to the bundle.
    pub fn apply_signal(&mut self, signal: &LinkSignal) {
        match signal {
            LinkSignal::Established => {
                if self.state == LinkState::Opening {
                    self.state = LinkState::Open;
                    self.up_since = Some(Utc::now());
                }
            },
            LinkSignal::Lost => {
                self.state = LinkState::Hangup;
                self.device = None;
                self.outq.clear();
                self.up_since = None;
            },
            LinkSignal::Closed => {
                self.state = LinkState::Closed;
                self.device = None;
                self.outq.clear();
                self.up_since = None;
            },
            _ => {},
        }
    }

    /// Queue a network packet for the device.
    pub fn enqueue(&mut self, packet: &[u8]) {
        let frame = self.protocol.encapsulate(packet);
        self.outq.push_back(frame);
    }

    /// One line of `show links` output.
    #[must_use]
    pub fn show(&self) -> String {
        format!("{}: {}", self.name, self.state)
    }

    fn lost(&mut self, events: &mut EventQueue) {
        self.device = None;
        events.link(self.id, LinkSignal::Lost);
        events.link(self.id, LinkSignal::Closed);
    }
}

impl Descriptor for Datalink {
    fn update_set<'fd>(&'fd self, sets: &mut FdSets<'fd>) -> usize {
        let Some(dev) = self.device.as_ref() else {
            return 0;
        };
        sets.watch_read(dev.as_fd());
        if !self.outq.is_empty() {
            sets.watch_write(dev.as_fd());
        }
        1
    }

    fn is_set(&self, ready: &ReadySet) -> bool {
        self.device
            .as_ref()
            .is_some_and(|d| ready.contains(d.as_fd().as_raw_fd()))
    }

    fn read(&mut self, _ready: &ReadySet, events: &mut EventQueue) {
        let Some(dev) = self.device.as_mut() else {
            return;
        };
        let mut buf = [0u8; READ_CHUNK];
        match dev.read(&mut buf) {
            Ok(0) => {
                info!(link = %self.name, "carrier lost");
                self.lost(events);
            },
            Ok(n) => {
                for signal in self.protocol.input(&buf[..n]) {
                    events.link(self.id, signal);
                }
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {},
            Err(e) => {
                warn!(link = %self.name, error = %e, "device read failed");
                self.lost(events);
            },
        }
    }

    fn write(&mut self, _ready: &ReadySet, events: &mut EventQueue) {
        let (Some(dev), Some(frame)) = (self.device.as_mut(), self.outq.front_mut()) else {
            return;
        };
        match dev.write(frame.as_slice()) {
            Ok(n) if n >= frame.len() => {
                self.outq.pop_front();
            },
            Ok(n) => {
                frame.drain(..n);
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {},
            Err(e) => {
                warn!(link = %self.name, error = %e, "device write failed");
                self.lost(events);
            },
        }
    }
}

//! The admin server.

use std::fmt;
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use mlppp_core::{Descriptor, EventQueue, FdSets, PromptId, ReadySet};
use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrStorage, UnixAddr, bind,
    getpeername, listen, setsockopt, socket, sockopt,
};
use nix::sys::stat::{Mode, umask};
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult, Transport};
use crate::policy::{Admission, CONNECTION_REFUSED, Origin, PeerAddr, UNRECOGNISED_ACCESS, admit};
use crate::prompt::{Connection, Prompt};

/// Pending-connection queue length of either listener.
pub const LISTEN_BACKLOG: i32 = 5;

const DEFAULT_MAX_SESSIONS: usize = 16;

/// What the server is listening on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// Nothing.
    Closed,
    /// A filesystem socket.
    Local(PathBuf),
    /// A TCP port on every interface.
    Tcp(u16),
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("not listening"),
            Self::Local(path) => write!(f, "listening at local socket {}", path.display()),
            Self::Tcp(port) => write!(f, "listening at port {port}"),
        }
    }
}

#[derive(Debug)]
enum Listener {
    Local { listener: UnixListener, path: PathBuf },
    Tcp { listener: TcpListener, port: u16 },
}

impl Listener {
    fn fd(&self) -> std::os::fd::BorrowedFd<'_> {
        match self {
            Self::Local { listener, .. } => listener.as_fd(),
            Self::Tcp { listener, .. } => listener.as_fd(),
        }
    }
}

/// Accepts admin connections and owns the resulting sessions.
#[derive(Debug)]
pub struct Server {
    listener: Option<Listener>,
    prompts: Vec<Prompt>,
    next_prompt: u32,
    max_sessions: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// A closed server.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listener: None,
            prompts: Vec::new(),
            next_prompt: 0,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// Refuse sessions beyond `max` concurrent ones.
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// Current listening mode.
    #[must_use]
    pub fn state(&self) -> ServerState {
        match &self.listener {
            None => ServerState::Closed,
            Some(Listener::Local { path, .. }) => ServerState::Local(path.clone()),
            Some(Listener::Tcp { port, .. }) => ServerState::Tcp(*port),
        }
    }

    /// Whether a listener is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    /// Listening TCP port, `0` when not listening on TCP.
    #[must_use]
    pub fn port(&self) -> u16 {
        match &self.listener {
            Some(Listener::Tcp { port, .. }) => *port,
            _ => 0,
        }
    }

    /// Path of the local socket, when listening on one.
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        match &self.listener {
            Some(Listener::Local { path, .. }) => Some(path),
            _ => None,
        }
    }

    /// Bound TCP address, if listening on TCP.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Some(Listener::Tcp { listener, .. }) => listener.local_addr().ok(),
            _ => None,
        }
    }

    /// Listen on the filesystem socket `path`, created with permission
    /// `mode` when given.
    ///
    /// Reopening the path already listened on only re-applies `mode`.
    /// Otherwise whatever was open is closed once the new socket listens.
    ///
    /// # Errors
    ///
    /// [`ServerError::PathTooLong`], or a socket/bind/listen failure. The
    /// previous listener is kept on error.
    pub fn open_local(&mut self, path: &Path, mode: Option<u32>) -> ServerResult<()> {
        if self.socket_path() == Some(path) {
            if let Some(mode) = mode {
                if let Err(e) = fs::set_permissions(path, Permissions::from_mode(mode)) {
                    error!(path = %path.display(), error = %e, "Local: chmod failed");
                }
            }
            return Ok(());
        }

        let listener = bind_local(path, mode).inspect_err(log_open_error)?;
        self.close();
        info!(target: "mlppp::phase", path = %path.display(), "Listening at local socket");
        self.listener = Some(Listener::Local {
            listener,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Listen on TCP `port` on every interface.
    ///
    /// Asking for the port already listened on does nothing.
    ///
    /// # Errors
    ///
    /// A socket/bind/listen failure. The previous listener is kept on error.
    pub fn open_tcp(&mut self, port: u16) -> ServerResult<()> {
        if self.port() == port {
            return Ok(());
        }
        let listener = bind_tcp(port).inspect_err(log_open_error)?;
        self.close();
        info!(target: "mlppp::phase", port, "Listening at port");
        self.listener = Some(Listener::Tcp { listener, port });
        Ok(())
    }

    /// Stop listening, remove the socket path and drop every session.
    /// Returns `false` when nothing was open.
    pub fn close(&mut self) -> bool {
        let Some(listener) = self.listener.take() else {
            return false;
        };
        if let Listener::Local { path, .. } = &listener {
            if let Err(e) = fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "could not remove socket path");
            }
        }
        drop(listener);
        let dropped = self.prompts.len();
        self.prompts.clear();
        info!(sessions = dropped, "server closed");
        true
    }

    /// Accept one pending connection. Returns the new session, if one was
    /// created.
    pub fn accept(&mut self) -> Option<PromptId> {
        let (conn, socket_path, reported) = match self.listener.as_ref()? {
            Listener::Local { listener, path } => match listener.accept() {
                Ok((s, _)) => (Connection::Local(s), path.display().to_string(), PeerAddr::Local),
                Err(e) => return accept_failed(&e),
            },
            Listener::Tcp { listener, .. } => match listener.accept() {
                Ok((s, addr)) => (Connection::Tcp(s), String::new(), PeerAddr::Inet(addr)),
                Err(e) => return accept_failed(&e),
            },
        };

        let peer = match getpeername::<SockaddrStorage>(conn.as_fd().as_raw_fd()) {
            Ok(addr) => PeerAddr::from_storage(&addr),
            Err(e) => {
                debug!(error = %e, "getpeername failed, using accept address");
                reported
            },
        };
        self.admit_connection(conn, &peer, &socket_path)
    }

    /// Apply the access policy to an accepted connection from `peer`.
    /// Rejected and unrecognised connections are closed before returning.
    pub fn admit_connection(
        &mut self,
        conn: Connection,
        peer: &PeerAddr,
        socket_path: &str,
    ) -> Option<PromptId> {
        match admit(peer, socket_path) {
            Admission::Reject => {
                if let PeerAddr::Inet(addr) = peer {
                    warn!(
                        target: "mlppp::alert",
                        peer = %addr,
                        "Rejected client connection (invalid port number)"
                    );
                }
                drop(conn);
                None
            },
            Admission::Unrecognised => {
                refuse(conn, UNRECOGNISED_ACCESS);
                None
            },
            Admission::Accept { origin, from } => {
                match origin {
                    Origin::Local => info!(target: "mlppp::phase", "Connected to local client"),
                    Origin::Tcp => info!(target: "mlppp::phase", peer = %from, "Connected to client"),
                }
                self.create_prompt(conn, origin, &from)
            },
        }
    }

    fn create_prompt(&mut self, conn: Connection, origin: Origin, from: &str) -> Option<PromptId> {
        if self.prompts.len() >= self.max_sessions {
            warn!(max = self.max_sessions, peer = from, "session limit reached");
            refuse(conn, CONNECTION_REFUSED);
            return None;
        }
        if let Err(e) = conn.set_nonblocking(true) {
            warn!(peer = from, error = %e, "cannot set up session");
            refuse(conn, CONNECTION_REFUSED);
            return None;
        }

        let id = PromptId(self.next_prompt);
        self.next_prompt = self.next_prompt.saturating_add(1);
        let mut prompt = Prompt::new(id, origin, from, conn);
        prompt.command_mode();
        prompt.set_required();
        self.prompts.push(prompt);
        Some(id)
    }

    /// Sessions, oldest first.
    #[must_use]
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    /// Session ids, oldest first.
    #[must_use]
    pub fn prompt_ids(&self) -> Vec<PromptId> {
        self.prompts.iter().map(Prompt::id).collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.prompts.len()
    }

    /// One session.
    #[must_use]
    pub fn prompt(&self, id: PromptId) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id() == id)
    }

    /// One session, mutably.
    pub fn prompt_mut(&mut self, id: PromptId) -> Option<&mut Prompt> {
        self.prompts.iter_mut().find(|p| p.id() == id)
    }

    /// Detach a session; dropping it closes the connection.
    pub fn remove_prompt(&mut self, id: PromptId) -> Option<Prompt> {
        let idx = self.prompts.iter().position(|p| p.id() == id)?;
        Some(self.prompts.remove(idx))
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

impl Descriptor for Server {
    fn update_set<'fd>(&'fd self, sets: &mut FdSets<'fd>) -> usize {
        match &self.listener {
            Some(listener) => {
                sets.watch_read(listener.fd());
                1
            },
            None => 0,
        }
    }

    fn is_set(&self, ready: &ReadySet) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|l| ready.contains(l.fd().as_raw_fd()))
    }

    fn read(&mut self, _ready: &ReadySet, _events: &mut EventQueue) {
        if let Some(id) = self.accept() {
            debug!(prompt = %id, "session created");
        }
    }

    fn write(&mut self, _ready: &ReadySet, _events: &mut EventQueue) {
        error!("server write: internal error, listener is never written");
    }
}

fn accept_failed(e: &io::Error) -> Option<PromptId> {
    if e.kind() != io::ErrorKind::WouldBlock {
        error!(error = %e, "accept failed");
    }
    None
}

fn refuse(mut conn: Connection, message: &[u8]) {
    if let Err(e) = conn.write_all(message) {
        debug!(error = %e, "could not deliver refusal");
    }
}

fn log_open_error(e: &ServerError) {
    match e {
        ServerError::Bind { .. } => warn!(code = e.code(), "{e}"),
        _ => error!(code = e.code(), "{e}"),
    }
}

fn backlog() -> Result<Backlog, Errno> {
    Backlog::new(LISTEN_BACKLOG)
}

/// Process umask that leaves exactly `mode` on a newly created socket.
#[allow(clippy::cast_possible_truncation)]
fn creation_mask(mode: u32) -> Mode {
    Mode::from_bits_truncate((!mode & 0o777) as nix::libc::mode_t)
}

fn bind_local(path: &Path, mode: Option<u32>) -> ServerResult<UnixListener> {
    let addr = UnixAddr::new(path).map_err(|e| match e {
        Errno::ENAMETOOLONG => ServerError::PathTooLong {
            path: path.to_path_buf(),
        },
        other => ServerError::Bind {
            transport: Transport::Local,
            source: other.into(),
        },
    })?;

    let fd: OwnedFd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
        .map_err(|e| ServerError::Socket {
            transport: Transport::Local,
            source: e.into(),
        })?;

    let previous = mode.map(|m| umask(creation_mask(m)));
    let bound = bind(fd.as_raw_fd(), &addr);
    if let Some(previous) = previous {
        umask(previous);
    }
    bound.map_err(|e| ServerError::Bind {
        transport: Transport::Local,
        source: e.into(),
    })?;

    if let Err(e) = backlog().and_then(|b| listen(&fd, b)) {
        if let Err(rm) = fs::remove_file(path) {
            debug!(path = %path.display(), error = %rm, "could not remove socket path");
        }
        return Err(ServerError::Listen {
            transport: Transport::Local,
            source: e.into(),
        });
    }

    let listener = UnixListener::from(fd);
    listener.set_nonblocking(true).map_err(|source| ServerError::Listen {
        transport: Transport::Local,
        source,
    })?;
    Ok(listener)
}

fn bind_tcp(port: u16) -> ServerResult<TcpListener> {
    let fd: OwnedFd = socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None)
        .map_err(|e| ServerError::Socket {
            transport: Transport::Tcp,
            source: e.into(),
        })?;
    if let Err(e) = setsockopt(&fd, sockopt::ReuseAddr, &true) {
        debug!(error = %e, "SO_REUSEADDR not set");
    }

    let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    bind(fd.as_raw_fd(), &addr).map_err(|e| ServerError::Bind {
        transport: Transport::Tcp,
        source: e.into(),
    })?;
    backlog()
        .and_then(|b| listen(&fd, b))
        .map_err(|e| ServerError::Listen {
            transport: Transport::Tcp,
            source: e.into(),
        })?;

    let listener = TcpListener::from(fd);
    listener.set_nonblocking(true).map_err(|source| ServerError::Listen {
        transport: Transport::Tcp,
        source,
    })?;
    Ok(listener)
}

//! Access policy for admin connections.
//!
//! Filesystem-socket peers are trusted; the socket's permission mode is
//! the only access control. TCP peers connecting from a source port below
//! [`MIN_CLIENT_PORT`] are turned away. Anything else is unrecognised.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use nix::sys::socket::{AddressFamily, SockaddrLike, SockaddrStorage};

/// Lowest source port a TCP client may connect from.
pub const MIN_CLIENT_PORT: u16 = 1024;

/// Written to a connection of an unknown address family before closing it.
pub const UNRECOGNISED_ACCESS: &[u8] = b"Unrecognised access !\n";

/// Written to a connection no session could be created for.
pub const CONNECTION_REFUSED: &[u8] = b"Connection refused.\n";

/// Where an admitted session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The filesystem socket.
    Local,
    /// The TCP port.
    Tcp,
}

impl Origin {
    /// `"local"` or `"tcp"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected peer's address, by family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    /// A filesystem-socket peer.
    Local,
    /// An IPv4 or IPv6 peer.
    Inet(SocketAddr),
    /// Any other family.
    Other(Option<AddressFamily>),
}

impl PeerAddr {
    /// Classify an address returned by `getpeername`.
    #[must_use]
    pub fn from_storage(addr: &SockaddrStorage) -> Self {
        match addr.family() {
            Some(AddressFamily::Unix) => Self::Local,
            Some(AddressFamily::Inet) => addr.as_sockaddr_in().map_or(
                Self::Other(Some(AddressFamily::Inet)),
                |sin| Self::Inet(SocketAddr::V4(SocketAddrV4::from(*sin))),
            ),
            Some(AddressFamily::Inet6) => addr.as_sockaddr_in6().map_or(
                Self::Other(Some(AddressFamily::Inet6)),
                |sin6| Self::Inet(SocketAddr::V6(SocketAddrV6::from(*sin6))),
            ),
            other => Self::Other(other),
        }
    }
}

/// What to do with a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Create a session.
    Accept {
        /// Session origin.
        origin: Origin,
        /// Display name: the socket path or `address:port`.
        from: String,
    },
    /// Close the connection without a word.
    Reject,
    /// Write [`UNRECOGNISED_ACCESS`] and close.
    Unrecognised,
}

/// Apply the access policy to `peer`. `socket_path` names local sessions.
#[must_use]
pub fn admit(peer: &PeerAddr, socket_path: &str) -> Admission {
    match peer {
        PeerAddr::Local => Admission::Accept {
            origin: Origin::Local,
            from: socket_path.to_owned(),
        },
        PeerAddr::Inet(addr) if addr.port() < MIN_CLIENT_PORT => Admission::Reject,
        PeerAddr::Inet(addr) => Admission::Accept {
            origin: Origin::Tcp,
            from: format!("{}:{}", addr.ip(), addr.port()),
        },
        PeerAddr::Other(_) => Admission::Unrecognised,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn tcp(port: u16) -> PeerAddr {
        PeerAddr::Inet(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), port))
    }

    #[test]
    fn test_privileged_source_ports_rejected() {
        assert_eq!(admit(&tcp(80), ""), Admission::Reject);
        assert_eq!(admit(&tcp(1023), ""), Admission::Reject);
        assert_eq!(admit(&tcp(0), ""), Admission::Reject);
    }

    #[test]
    fn test_unprivileged_source_ports_accepted() {
        assert_eq!(
            admit(&tcp(1024), ""),
            Admission::Accept {
                origin: Origin::Tcp,
                from: "192.0.2.7:1024".into()
            }
        );
        assert!(matches!(admit(&tcp(65535), ""), Admission::Accept { .. }));
    }

    #[test]
    fn test_local_always_accepted() {
        assert_eq!(
            admit(&PeerAddr::Local, "/var/run/mlppp.sock"),
            Admission::Accept {
                origin: Origin::Local,
                from: "/var/run/mlppp.sock".into()
            }
        );
    }

    #[test]
    fn test_other_families_unrecognised() {
        assert_eq!(admit(&PeerAddr::Other(None), ""), Admission::Unrecognised);
    }

    #[test]
    fn test_messages_have_fixed_lengths() {
        assert_eq!(UNRECOGNISED_ACCESS.len(), 22);
        assert_eq!(CONNECTION_REFUSED.len(), 20);
    }

    #[test]
    fn test_classifies_inet_storage() {
        let v4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000);
        let storage = SockaddrStorage::from(v4);
        assert_eq!(PeerAddr::from_storage(&storage), PeerAddr::Inet(SocketAddr::V4(v4)));
    }
}

// Classification of inherited file descriptors
//
// An inherited descriptor number tells us nothing about what is behind it.
// Classification probes the kernel for the socket type and bound address
// family, then wraps the descriptor in the matching Tokio handle:
//
// 1. Query SO_TYPE via getsockopt() to distinguish stream from datagram
// 2. Query the bound address via getsockname() for the address family
// 3. Convert the raw FD to the typed std socket, then to the Tokio type
//
// The probe order is stream first, then datagram. A descriptor that fits
// neither interpretation is dropped; one bad inherited descriptor must not
// prevent use of the others, so no error surfaces from here.
//
// Conversion to a Tokio type registers the socket with the runtime's I/O
// driver, so classification must run inside a Tokio runtime context.

use crate::network::{PlatformOptions, SocketOptions};
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::Arc;
use tracing::debug;

/// Shared handle to an inherited or freshly created stream listener.
///
/// Cloning shares the same underlying OS resource; every caller handed a
/// matching inherited listener sees the one accept queue.
#[derive(Debug, Clone)]
pub enum StreamHandle {
    /// TCP listening socket
    Tcp(Arc<tokio::net::TcpListener>),
    /// Unix domain stream listening socket
    Unix(Arc<tokio::net::UnixListener>),
}

impl StreamHandle {
    /// Returns true when both handles denote the same underlying listener
    pub fn same_resource(&self, other: &StreamHandle) -> bool {
        match (self, other) {
            (StreamHandle::Tcp(a), StreamHandle::Tcp(b)) => Arc::ptr_eq(a, b),
            (StreamHandle::Unix(a), StreamHandle::Unix(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Get the TCP listener if this is a TCP handle
    pub fn as_tcp(&self) -> Option<&Arc<tokio::net::TcpListener>> {
        match self {
            StreamHandle::Tcp(listener) => Some(listener),
            _ => None,
        }
    }

    /// Get the Unix listener if this is a Unix domain handle
    pub fn as_unix(&self) -> Option<&Arc<tokio::net::UnixListener>> {
        match self {
            StreamHandle::Unix(listener) => Some(listener),
            _ => None,
        }
    }
}

/// Shared handle to an inherited or freshly created datagram socket
#[derive(Debug, Clone)]
pub enum DatagramHandle {
    /// UDP socket
    Udp(Arc<tokio::net::UdpSocket>),
    /// Unix domain datagram socket
    Unix(Arc<tokio::net::UnixDatagram>),
}

impl DatagramHandle {
    /// Returns true when both handles denote the same underlying socket
    pub fn same_resource(&self, other: &DatagramHandle) -> bool {
        match (self, other) {
            (DatagramHandle::Udp(a), DatagramHandle::Udp(b)) => Arc::ptr_eq(a, b),
            (DatagramHandle::Unix(a), DatagramHandle::Unix(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Get the UDP socket if this is a UDP handle
    pub fn as_udp(&self) -> Option<&Arc<tokio::net::UdpSocket>> {
        match self {
            DatagramHandle::Udp(socket) => Some(socket),
            _ => None,
        }
    }

    /// Get the Unix datagram socket if this is a Unix domain handle
    pub fn as_unix(&self) -> Option<&Arc<tokio::net::UnixDatagram>> {
        match self {
            DatagramHandle::Unix(socket) => Some(socket),
            _ => None,
        }
    }
}

/// One successfully classified inherited stream listener.
///
/// Immutable once created. `network` is the version-qualified family token
/// recorded at classification time ("tcp4", "tcp6", "unix"). For Unix
/// domain listeners `host` is the filesystem path and `port` is zero.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub fd: RawFd,
    pub name: String,
    pub network: String,
    pub host: String,
    pub port: u16,
    pub handle: StreamHandle,
}

/// One successfully classified inherited datagram socket.
///
/// The port is kept as decimal text; datagram lookups compare it textually.
#[derive(Debug, Clone)]
pub struct DatagramEntry {
    pub fd: RawFd,
    pub name: String,
    pub network: String,
    pub host: String,
    pub port: String,
    pub handle: DatagramHandle,
}

/// Outcome of classifying one inherited descriptor
#[derive(Debug)]
pub enum Classified {
    /// Descriptor is a stream listening socket
    Stream(StreamEntry),
    /// Descriptor is a datagram socket
    Datagram(DatagramEntry),
    /// Descriptor fits neither interpretation and is dropped
    Unclassifiable,
}

/// Classify one inherited raw descriptor.
///
/// Probes stream interpretation first, then datagram. On either success the
/// platform option set is applied best-effort; an inherited socket already
/// works, so a failed option does not reject it. A descriptor that cannot
/// be classified is closed if a conversion step already took ownership,
/// and is never retried.
pub fn classify(fd: RawFd, name: String) -> Classified {
    if let Some(entry) = try_stream(fd, &name) {
        return Classified::Stream(entry);
    }
    if let Some(entry) = try_datagram(fd, &name) {
        return Classified::Datagram(entry);
    }
    Classified::Unclassifiable
}

/// Interpret the descriptor as a stream listening socket
fn try_stream(fd: RawFd, name: &str) -> Option<StreamEntry> {
    if socket_type(fd)? != libc::SOCK_STREAM {
        return None;
    }
    let family = socket_family(fd)?;
    tune_inherited(fd);

    match family {
        libc::AF_INET | libc::AF_INET6 => {
            // Safety: SO_TYPE and the address family were verified above
            let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
            std_listener.set_nonblocking(true).ok()?;
            let addr = std_listener.local_addr().ok()?;
            let listener = tokio::net::TcpListener::from_std(std_listener).ok()?;

            let network = if addr.is_ipv4() { "tcp4" } else { "tcp6" };
            Some(StreamEntry {
                fd,
                name: name.to_string(),
                network: network.to_string(),
                host: addr.ip().to_string(),
                port: addr.port(),
                handle: StreamHandle::Tcp(Arc::new(listener)),
            })
        }
        libc::AF_UNIX => {
            // Safety: SO_TYPE and the address family were verified above
            let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) };
            std_listener.set_nonblocking(true).ok()?;
            let addr = std_listener.local_addr().ok()?;
            let listener = tokio::net::UnixListener::from_std(std_listener).ok()?;

            // Path sockets carry the path as host; port has no meaning
            let host = addr
                .as_pathname()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            Some(StreamEntry {
                fd,
                name: name.to_string(),
                network: "unix".to_string(),
                host,
                port: 0,
                handle: StreamHandle::Unix(Arc::new(listener)),
            })
        }
        _ => None,
    }
}

/// Interpret the descriptor as a datagram socket
fn try_datagram(fd: RawFd, name: &str) -> Option<DatagramEntry> {
    if socket_type(fd)? != libc::SOCK_DGRAM {
        return None;
    }
    let family = socket_family(fd)?;
    tune_inherited(fd);

    match family {
        libc::AF_INET | libc::AF_INET6 => {
            // Safety: SO_TYPE and the address family were verified above
            let std_socket = unsafe { std::net::UdpSocket::from_raw_fd(fd) };
            std_socket.set_nonblocking(true).ok()?;
            let addr = std_socket.local_addr().ok()?;
            let socket = tokio::net::UdpSocket::from_std(std_socket).ok()?;

            let network = if addr.is_ipv4() { "udp4" } else { "udp6" };
            Some(DatagramEntry {
                fd,
                name: name.to_string(),
                network: network.to_string(),
                host: addr.ip().to_string(),
                port: addr.port().to_string(),
                handle: DatagramHandle::Udp(Arc::new(socket)),
            })
        }
        libc::AF_UNIX => {
            // Safety: SO_TYPE and the address family were verified above
            let std_socket = unsafe { std::os::unix::net::UnixDatagram::from_raw_fd(fd) };
            std_socket.set_nonblocking(true).ok()?;
            let addr = std_socket.local_addr().ok()?;
            let socket = tokio::net::UnixDatagram::from_std(std_socket).ok()?;

            let host = addr
                .as_pathname()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            Some(DatagramEntry {
                fd,
                name: name.to_string(),
                network: "unixgram".to_string(),
                host,
                port: "0".to_string(),
                handle: DatagramHandle::Unix(Arc::new(socket)),
            })
        }
        _ => None,
    }
}

/// Best-effort option application on an inherited descriptor
fn tune_inherited(fd: RawFd) {
    if let Err(error) = PlatformOptions::tune(fd) {
        debug!(fd, %error, "ignoring socket option failure on inherited descriptor");
    }
}

/// Query the socket type (SOCK_STREAM, SOCK_DGRAM, ...) from the kernel
fn socket_type(fd: RawFd) -> Option<libc::c_int> {
    let mut socket_type: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut socket_type as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(socket_type)
}

/// Query the bound address family (AF_INET, AF_INET6, AF_UNIX) from the kernel
fn socket_family(fd: RawFd) -> Option<libc::c_int> {
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let result = unsafe {
        libc::getsockname(
            fd,
            &mut addr as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    };

    (result == 0).then_some(addr.ss_family as libc::c_int)
}

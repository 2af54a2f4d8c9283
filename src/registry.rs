// Lookup-or-create over the inherited transport lists
//
// The registry answers "give me a listener on this network and address" by
// first scanning the inherited entries and only falling back to creating a
// socket when nothing matches. A hit hands back the pre-existing shared
// handle, so a replacement process keeps serving on a socket whose accept
// queue already holds pending connections.
//
// Matching discipline: the entry's recorded family token must start with
// the requested token (a request for "tcp" matches inherited "tcp4" or
// "tcp6" entries), and the normalized host and port must be equal. First
// match in list order wins. Stream ports compare as integers; datagram
// ports compare as decimal text. That asymmetry is long-standing observed
// behavior and is pinned by tests.

use crate::activation::{
    scan, ActivationEnv, DatagramEntry, DatagramHandle, InheritedSockets, StreamEntry,
    StreamHandle,
};
use crate::network::{normalize, PlatformOptions, SocketOptions};
use crate::{ListenError, Result};
use async_trait::async_trait;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use tracing::debug;

/// Pre-accept tuning hook handed to the socket-creation collaborator
pub type TuneFn = fn(RawFd) -> io::Result<()>;

/// Socket-creation collaborator consumed by the registry on lookup misses.
///
/// Implementations create a ready listener or socket for the given network
/// and address, running the tuning hook (when given) before the socket
/// starts accepting. A hook failure here is a hard error: the socket is
/// being created specifically under the requested options.
#[async_trait]
pub trait BindSocket: Send + Sync {
    async fn bind_stream(
        &self,
        network: &str,
        address: &str,
        tune: Option<TuneFn>,
    ) -> Result<StreamHandle>;

    async fn bind_datagram(
        &self,
        network: &str,
        address: &str,
        tune: Option<TuneFn>,
    ) -> Result<DatagramHandle>;
}

/// Default collaborator creating Tokio sockets.
///
/// TCP listeners are built through `TcpSocket` so the tuning hook runs
/// between socket creation and bind, matching the treatment inherited
/// descriptors received from their own supervisor. Local-domain sockets
/// take no hook; none of the tuned options applies to them.
pub struct TokioBinder;

#[async_trait]
impl BindSocket for TokioBinder {
    async fn bind_stream(
        &self,
        network: &str,
        address: &str,
        tune: Option<TuneFn>,
    ) -> Result<StreamHandle> {
        match network {
            "tcp" | "tcp4" | "tcp6" => {
                let addr = normalize(network, address)?.to_socket_addr()?;
                let socket = if addr.is_ipv4() {
                    tokio::net::TcpSocket::new_v4()?
                } else {
                    tokio::net::TcpSocket::new_v6()?
                };

                if let Some(tune) = tune {
                    tune(socket.as_raw_fd()).map_err(ListenError::SocketOption)?;
                }

                socket.bind(addr)?;
                let listener = socket.listen(1024)?;
                Ok(StreamHandle::Tcp(Arc::new(listener)))
            }
            "unix" => {
                let listener = tokio::net::UnixListener::bind(address)?;
                Ok(StreamHandle::Unix(Arc::new(listener)))
            }
            _ => Err(ListenError::UnsupportedNetwork(network.to_string())),
        }
    }

    async fn bind_datagram(
        &self,
        network: &str,
        address: &str,
        tune: Option<TuneFn>,
    ) -> Result<DatagramHandle> {
        match network {
            "udp" | "udp4" | "udp6" => {
                let addr = normalize(network, address)?.to_socket_addr()?;
                let std_socket = std::net::UdpSocket::bind(addr)?;

                if let Some(tune) = tune {
                    tune(std_socket.as_raw_fd()).map_err(ListenError::SocketOption)?;
                }

                std_socket.set_nonblocking(true)?;
                let socket = tokio::net::UdpSocket::from_std(std_socket)?;
                Ok(DatagramHandle::Udp(Arc::new(socket)))
            }
            "unixgram" | "unix" => {
                let socket = tokio::net::UnixDatagram::bind(address)?;
                Ok(DatagramHandle::Unix(Arc::new(socket)))
            }
            _ => Err(ListenError::UnsupportedNetwork(network.to_string())),
        }
    }
}

/// Registry over the inherited transport lists.
///
/// Built once at process start and read-only afterward; methods take
/// `&self` and concurrent callers need no synchronization. Handed-out
/// handles share the underlying resource.
pub struct Registry<B = TokioBinder> {
    streams: Vec<StreamEntry>,
    datagrams: Vec<DatagramEntry>,
    activation_owner: bool,
    binder: B,
}

impl Registry<TokioBinder> {
    /// Build the registry from the process environment, scanning and
    /// classifying every advertised descriptor.
    ///
    /// Must run inside a Tokio runtime context.
    pub fn from_env() -> Self {
        let env = ActivationEnv::from_env();
        let inherited = scan(&env);
        Self::with_inherited(inherited, env.is_activation_owner(), TokioBinder)
    }
}

impl<B: BindSocket> Registry<B> {
    /// Build the registry from an already scanned (or synthetic) table
    pub fn with_inherited(inherited: InheritedSockets, activation_owner: bool, binder: B) -> Self {
        Self {
            streams: inherited.streams,
            datagrams: inherited.datagrams,
            activation_owner,
            binder,
        }
    }

    /// Return an inherited stream listener matching the request, or create
    /// a fresh one through the collaborator.
    ///
    /// `tcp`-family addresses are normalized first; normalization errors
    /// propagate. Other networks treat the whole address as the host, the
    /// Unix domain path case.
    pub async fn listen(&self, network: &str, address: &str) -> Result<StreamHandle> {
        let (host, port) = if network.starts_with("tcp") {
            let addr = normalize(network, address)?;
            (addr.host, addr.port)
        } else {
            (address.to_string(), 0)
        };

        for entry in &self.streams {
            if entry.network.starts_with(network) && entry.host == host && entry.port == port {
                debug!(
                    fd = entry.fd,
                    name = %entry.name,
                    network = %entry.network,
                    "reusing inherited stream listener"
                );
                return Ok(entry.handle.clone());
            }
        }

        debug!(network, address, "no inherited match, creating stream listener");
        self.binder
            .bind_stream(network, address, Some(PlatformOptions::tune))
            .await
    }

    /// Return an inherited datagram socket matching the request, or create
    /// a fresh one through the collaborator.
    ///
    /// Datagram entries record their port as decimal text, so the
    /// normalized port is rendered to text for the comparison.
    pub async fn listen_datagram(&self, network: &str, address: &str) -> Result<DatagramHandle> {
        let (host, port) = if network.starts_with("udp") {
            let addr = normalize(network, address)?;
            (addr.host, addr.port.to_string())
        } else {
            (address.to_string(), "0".to_string())
        };

        for entry in &self.datagrams {
            if entry.network.starts_with(network) && entry.host == host && entry.port == port {
                debug!(
                    fd = entry.fd,
                    name = %entry.name,
                    network = %entry.network,
                    "reusing inherited datagram socket"
                );
                return Ok(entry.handle.clone());
            }
        }

        debug!(network, address, "no inherited match, creating datagram socket");
        self.binder
            .bind_datagram(network, address, Some(PlatformOptions::tune))
            .await
    }

    /// First stream entry satisfying the predicate
    pub fn find_stream<P>(&self, mut predicate: P) -> Option<&StreamEntry>
    where
        P: FnMut(&StreamEntry) -> bool,
    {
        self.streams.iter().find(|entry| predicate(entry))
    }

    /// First datagram entry satisfying the predicate
    pub fn find_datagram<P>(&self, mut predicate: P) -> Option<&DatagramEntry>
    where
        P: FnMut(&DatagramEntry) -> bool,
    {
        self.datagrams.iter().find(|entry| predicate(entry))
    }

    /// First inherited stream entry, if any.
    ///
    /// Convenience for the common single-socket activation setup.
    pub fn first_stream(&self) -> Option<&StreamEntry> {
        self.streams.first()
    }

    /// Whether any inherited socket was classified into either list
    pub fn has_inherited_sockets(&self) -> bool {
        !self.streams.is_empty() || !self.datagrams.is_empty()
    }

    /// Whether the activation environment named this process as the
    /// intended descriptor consumer
    pub fn is_activation_owner(&self) -> bool {
        self.activation_owner
    }

    /// Inherited stream entries, ascending descriptor order
    pub fn streams(&self) -> &[StreamEntry] {
        &self.streams
    }

    /// Inherited datagram entries, ascending descriptor order
    pub fn datagrams(&self) -> &[DatagramEntry] {
        &self.datagrams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Delegates to TokioBinder but records every creation request
    struct RecordingBinder {
        stream_calls: Mutex<Vec<(String, String)>>,
        datagram_calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingBinder {
        fn new() -> Self {
            Self {
                stream_calls: Mutex::new(Vec::new()),
                datagram_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BindSocket for RecordingBinder {
        async fn bind_stream(
            &self,
            network: &str,
            address: &str,
            tune: Option<TuneFn>,
        ) -> Result<StreamHandle> {
            self.stream_calls
                .lock()
                .unwrap()
                .push((network.to_string(), address.to_string()));
            TokioBinder.bind_stream(network, address, tune).await
        }

        async fn bind_datagram(
            &self,
            network: &str,
            address: &str,
            tune: Option<TuneFn>,
        ) -> Result<DatagramHandle> {
            self.datagram_calls
                .lock()
                .unwrap()
                .push((network.to_string(), address.to_string()));
            TokioBinder.bind_datagram(network, address, tune).await
        }
    }

    async fn inherited_tcp(name: &str) -> StreamEntry {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fd = listener.as_raw_fd();
        let addr = listener.local_addr().unwrap();
        StreamEntry {
            fd,
            name: name.to_string(),
            network: "tcp4".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            handle: StreamHandle::Tcp(Arc::new(listener)),
        }
    }

    async fn inherited_udp(name: &str) -> DatagramEntry {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let fd = socket.as_raw_fd();
        let addr = socket.local_addr().unwrap();
        DatagramEntry {
            fd,
            name: name.to_string(),
            network: "udp4".to_string(),
            host: addr.ip().to_string(),
            port: addr.port().to_string(),
            handle: DatagramHandle::Udp(Arc::new(socket)),
        }
    }

    fn registry_with<B: BindSocket>(
        streams: Vec<StreamEntry>,
        datagrams: Vec<DatagramEntry>,
        binder: B,
    ) -> Registry<B> {
        Registry::with_inherited(
            InheritedSockets { streams, datagrams },
            false,
            binder,
        )
    }

    #[tokio::test]
    async fn listen_reuses_matching_inherited_entry() {
        let entry = inherited_tcp("web").await;
        let address = format!("{}:{}", entry.host, entry.port);
        let inherited_handle = entry.handle.clone();
        let binder = RecordingBinder::new();
        let registry = registry_with(vec![entry], vec![], binder);

        let first = registry.listen("tcp", &address).await.unwrap();
        let second = registry.listen("tcp", &address).await.unwrap();

        assert!(first.same_resource(&inherited_handle));
        assert!(first.same_resource(&second));
        assert!(registry.binder.stream_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn version_qualified_request_matches_exact_entry_only() {
        let entry = inherited_tcp("web").await;
        let address = format!("{}:{}", entry.host, entry.port);
        let registry = registry_with(vec![entry], vec![], RecordingBinder::new());

        // entry token "tcp4" starts with the request "tcp4"
        let handle = registry.listen("tcp4", &address).await.unwrap();
        assert!(handle.same_resource(&registry.streams()[0].handle));

        // "tcp4" does not start with "tcp6": family mismatch falls through
        // to creation even though host and port agree
        let _ = registry.listen("tcp6", &address).await;
        assert_eq!(
            registry.binder.stream_calls.lock().unwrap().as_slice(),
            &[("tcp6".to_string(), address.clone())]
        );
    }

    #[tokio::test]
    async fn address_mismatch_falls_through_to_creation() {
        let entry = inherited_tcp("web").await;
        let inherited_handle = entry.handle.clone();
        let registry = registry_with(vec![entry], vec![], RecordingBinder::new());

        let fresh = registry.listen("tcp", "127.0.0.1:0").await.unwrap();
        assert!(!fresh.same_resource(&inherited_handle));
        assert_eq!(registry.binder.stream_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_matching_entry_wins() {
        // Two entries for the same address: reuse-port makes this a real
        // deployment shape, and list order must decide
        let first = inherited_tcp("a").await;
        let mut second = inherited_tcp("b").await;
        second.host = first.host.clone();
        second.port = first.port;
        let address = format!("{}:{}", first.host, first.port);
        let first_handle = first.handle.clone();

        let registry = registry_with(vec![first, second], vec![], RecordingBinder::new());
        let handle = registry.listen("tcp", &address).await.unwrap();
        assert!(handle.same_resource(&first_handle));
    }

    #[tokio::test]
    async fn datagram_lookup_compares_port_as_text() {
        let entry = inherited_udp("metrics").await;
        let address = format!("{}:{}", entry.host, entry.port);
        let inherited_handle = entry.handle.clone();

        let mut padded = inherited_udp("padded").await;
        // Same endpoint rendered differently never matches: comparison is
        // textual on the datagram path
        padded.port = format!("0{}", padded.port);
        let padded_address = format!("{}:{}", padded.host, padded.port.trim_start_matches('0'));

        let registry = registry_with(vec![], vec![entry, padded], RecordingBinder::new());

        let hit = registry.listen_datagram("udp", &address).await.unwrap();
        assert!(hit.same_resource(&inherited_handle));

        let _ = registry.listen_datagram("udp", &padded_address).await;
        assert!(!registry.binder.datagram_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_address_propagates_format_error() {
        let registry = registry_with(vec![], vec![], RecordingBinder::new());
        let err = registry.listen("tcp", "no-port-here").await.unwrap_err();
        assert!(matches!(err, ListenError::AddressFormat(_)));
        assert!(registry.binder.stream_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_network_reaches_caller_from_binder() {
        let registry = registry_with(vec![], vec![], TokioBinder);
        let err = registry.listen("sctp", "whatever").await.unwrap_err();
        assert!(matches!(err, ListenError::UnsupportedNetwork(_)));
    }

    #[tokio::test]
    async fn status_queries_reflect_scan_results() {
        let empty = registry_with(vec![], vec![], TokioBinder);
        assert!(!empty.has_inherited_sockets());
        assert!(!empty.is_activation_owner());
        assert!(empty.first_stream().is_none());

        let entry = inherited_tcp("web").await;
        let registry = Registry::with_inherited(
            InheritedSockets {
                streams: vec![entry],
                datagrams: vec![],
            },
            true,
            TokioBinder,
        );
        assert!(registry.has_inherited_sockets());
        assert!(registry.is_activation_owner());
        assert_eq!(registry.first_stream().unwrap().name, "web");
    }

    #[tokio::test]
    async fn find_generalizes_lookup_beyond_addresses() {
        let web = inherited_tcp("web").await;
        let admin = inherited_tcp("admin").await;
        let metrics = inherited_udp("metrics").await;

        let registry = registry_with(vec![web, admin], vec![metrics], TokioBinder);

        assert_eq!(
            registry.find_stream(|e| e.name == "admin").unwrap().name,
            "admin"
        );
        assert!(registry.find_stream(|e| e.name == "missing").is_none());
        assert_eq!(
            registry.find_datagram(|e| e.name == "metrics").unwrap().fd,
            registry.datagrams()[0].fd
        );
    }
}

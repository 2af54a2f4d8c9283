use thiserror::Error;

/// Error types for the relisten library
#[derive(Error, Debug)]
pub enum ListenError {
    /// Address string could not be split into host and port
    #[error("malformed address {0:?}: expected \"host:port\"")]
    AddressFormat(String),

    /// Network token is not a supported family
    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    /// A requested socket option could not be applied to a new socket
    #[error("socket option error: {0}")]
    SocketOption(#[source] std::io::Error),

    /// Socket creation errors (bind, listen, runtime registration)
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),
}

/// Result type for the relisten library
pub type Result<T> = std::result::Result<T, ListenError>;

pub mod activation;
pub mod network;
pub mod registry;

// Re-export main types for convenience
pub use activation::{
    classify, scan, scan_with, ActivationEnv, Classified, DatagramEntry, DatagramHandle,
    InheritedSockets, StreamEntry, StreamHandle,
};
pub use network::{normalize, NormalizedAddr, PlatformOptions, SocketOptions};
pub use registry::{BindSocket, Registry, TokioBinder, TuneFn};

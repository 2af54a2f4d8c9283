//! Address normalization and socket option application

pub mod address;
pub mod options;

pub use address::{normalize, NormalizedAddr};
pub use options::{PlatformOptions, SocketOptions};

//! Inherited descriptor discovery and classification

pub mod classify;
pub mod env;

pub use classify::{classify, Classified, DatagramEntry, DatagramHandle, StreamEntry, StreamHandle};
pub use env::{
    scan, scan_with, ActivationEnv, InheritedSockets, FD_START, LISTEN_FDNAMES, LISTEN_FDS,
    LISTEN_PID,
};

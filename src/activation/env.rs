// Environment descriptor scanning
//
// Supervisors that pre-open listening sockets advertise them through the
// systemd socket-activation contract:
// - LISTEN_FDS: number of file descriptors passed (integer)
// - LISTEN_FDNAMES: colon-separated names for each FD (optional per slot)
// - LISTEN_PID: PID that should consume the FDs
//
// Passed descriptors start at FD 3, after stdin/stdout/stderr, and run
// sequentially. The scan happens once at process start; the lists it
// produces are never extended or re-scanned, and the descriptors live
// until process exit.

use crate::activation::classify::{classify, Classified, DatagramEntry, StreamEntry};
use std::io;
use std::os::unix::io::RawFd;
use tracing::{debug, info};

pub const LISTEN_FDS: &str = "LISTEN_FDS";
pub const LISTEN_FDNAMES: &str = "LISTEN_FDNAMES";
pub const LISTEN_PID: &str = "LISTEN_PID";

/// First descriptor number used for passed sockets
pub const FD_START: RawFd = 3;

/// Snapshot of the socket-activation environment, read once at start-up.
///
/// Tests construct this directly instead of mutating process environment
/// variables.
#[derive(Debug, Clone, Default)]
pub struct ActivationEnv {
    /// Parsed LISTEN_FDS; `None` when absent or not a non-negative integer,
    /// which means this process start is not socket-activated
    pub fd_count: Option<u32>,
    /// Positional descriptor names from LISTEN_FDNAMES
    pub fd_names: Vec<String>,
    /// Parsed LISTEN_PID
    pub owner_pid: Option<u32>,
}

impl ActivationEnv {
    /// Read the activation variables from the process environment
    pub fn from_env() -> Self {
        let fd_count = std::env::var(LISTEN_FDS)
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        let fd_names = std::env::var(LISTEN_FDNAMES)
            .map(|s| s.split(':').map(|n| n.to_string()).collect())
            .unwrap_or_default();

        let owner_pid = std::env::var(LISTEN_PID)
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        Self {
            fd_count,
            fd_names,
            owner_pid,
        }
    }

    /// Whether the activation environment names this process as the
    /// intended consumer of the passed descriptors.
    ///
    /// Independent of whether any descriptor classified successfully.
    pub fn is_activation_owner(&self) -> bool {
        self.owner_pid == Some(std::process::id())
    }
}

/// The two transport lists produced by one scan, in ascending descriptor
/// number order. Built once; read-only afterward.
#[derive(Debug, Default)]
pub struct InheritedSockets {
    pub streams: Vec<StreamEntry>,
    pub datagrams: Vec<DatagramEntry>,
}

impl InheritedSockets {
    /// True when either transport list is non-empty
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty() && self.datagrams.is_empty()
    }
}

/// Scan the inherited descriptor range described by `env`.
///
/// Each candidate descriptor is marked close-on-exec so children spawned
/// later do not inherit it, then classified. Unclassifiable descriptors
/// are dropped silently; one bad descriptor never aborts the scan.
///
/// Must run inside a Tokio runtime context (see classify).
pub fn scan(env: &ActivationEnv) -> InheritedSockets {
    scan_with(env, |fd, name| {
        if let Err(error) = set_cloexec(fd) {
            debug!(fd, %error, "could not set close-on-exec on inherited descriptor");
        }
        classify(fd, name)
    })
}

/// Scan with a caller-supplied classifier.
///
/// This is the seam the real `scan` goes through; tests substitute a
/// synthetic classifier to drive the enumeration without real sockets.
pub fn scan_with<C>(env: &ActivationEnv, mut classify: C) -> InheritedSockets
where
    C: FnMut(RawFd, String) -> Classified,
{
    let mut inherited = InheritedSockets::default();

    let Some(count) = env.fd_count else {
        return inherited;
    };
    let count = clamp_count(count);

    for offset in 0..count {
        let fd = FD_START + offset as RawFd;

        // Positional name when present and non-empty, otherwise a
        // placeholder encoding the descriptor number
        let name = env
            .fd_names
            .get(offset as usize)
            .filter(|n| !n.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("fd_{fd}"));

        match classify(fd, name) {
            Classified::Stream(entry) => {
                info!(
                    fd,
                    name = %entry.name,
                    network = %entry.network,
                    host = %entry.host,
                    port = entry.port,
                    "inherited stream listener"
                );
                inherited.streams.push(entry);
            }
            Classified::Datagram(entry) => {
                info!(
                    fd,
                    name = %entry.name,
                    network = %entry.network,
                    host = %entry.host,
                    port = %entry.port,
                    "inherited datagram socket"
                );
                inherited.datagrams.push(entry);
            }
            Classified::Unclassifiable => {
                debug!(fd, "dropping unclassifiable inherited descriptor");
            }
        }
    }

    inherited
}

/// Largest usable descriptor count: numbers enumerated from `FD_START`
/// must stay within `RawFd`, whatever the environment claims
fn clamp_count(count: u32) -> u32 {
    count.min((RawFd::MAX - FD_START) as u32 + 1)
}

/// Mark a descriptor close-on-exec
fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let result = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// Socket option application as a per-platform capability
//
// Both inherited descriptors and freshly created sockets get the same
// option treatment: address reuse, port reuse (where the platform has it),
// low-latency send, broadcast, applied in that fixed order. The first
// option that fails stops the sequence and becomes the combined outcome.
//
// Callers treat `tune` as one opaque operation. How the outcome is handled
// differs by call site: best-effort (ignored) when wrapping an already
// working inherited socket, propagated when tuning a socket being created
// under the requested options.

use std::io;
use std::os::unix::io::RawFd;

/// Named socket option operations, one implementation per platform.
///
/// `REUSE_PORT` declares whether the platform has a port-reuse option at
/// all; where it is `false`, `tune` skips that step rather than failing.
pub trait SocketOptions {
    /// Whether this platform supports a port-reuse option
    const REUSE_PORT: bool;

    fn reuse_address(fd: RawFd) -> io::Result<()>;
    fn reuse_port(fd: RawFd) -> io::Result<()>;
    fn low_latency(fd: RawFd) -> io::Result<()>;
    fn broadcast(fd: RawFd) -> io::Result<()>;

    /// Apply the full option set in fixed order, stopping at the first
    /// failure.
    fn tune(fd: RawFd) -> io::Result<()> {
        Self::reuse_address(fd)?;
        if Self::REUSE_PORT {
            Self::reuse_port(fd)?;
        }
        Self::low_latency(fd)?;
        Self::broadcast(fd)
    }
}

/// Option applier for Unix-family platforms
pub struct PlatformOptions;

#[cfg(unix)]
impl SocketOptions for PlatformOptions {
    const REUSE_PORT: bool = true;

    fn reuse_address(fd: RawFd) -> io::Result<()> {
        setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
    }

    fn reuse_port(fd: RawFd) -> io::Result<()> {
        setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1)
    }

    fn low_latency(fd: RawFd) -> io::Result<()> {
        // TCP_NODELAY has no meaning for datagram or local-domain sockets;
        // the kernel reports that as a protocol mismatch, which counts as
        // "nothing to apply" rather than a failed tune
        match setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1) {
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::ENOPROTOOPT) | Some(libc::EOPNOTSUPP) | Some(libc::EINVAL)
                ) =>
            {
                Ok(())
            }
            other => other,
        }
    }

    fn broadcast(fd: RawFd) -> io::Result<()> {
        setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_BROADCAST, 1)
    }
}

/// Set an integer-valued socket option on a raw descriptor
#[cfg(unix)]
fn setsockopt_int(fd: RawFd, level: libc::c_int, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let result = unsafe {
        libc::setsockopt(
            fd,
            level,
            option,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

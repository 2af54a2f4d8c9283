// Address normalization for registry lookups
//
// User-supplied "host:port" strings and kernel-reported bound addresses must
// compare equal when they denote the same endpoint. This module produces the
// canonical form both sides are reduced to: a bracket-stripped host string
// plus an integer port, with family-specific wildcard substitution when the
// host component is empty.

use crate::{ListenError, Result};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Wildcard host substituted for an empty host on IPv4-family networks.
pub const WILDCARD_V4: &str = "0.0.0.0";

/// Literal substituted for an empty host on IPv6-family networks.
///
/// Kept verbatim from observed behavior: a bracketed loopback literal, not
/// the unspecified address. Pinned by tests; do not change without
/// confirming intent.
pub const WILDCARD_V6: &str = "[::1]";

/// Canonical form of a network endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for NormalizedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl NormalizedAddr {
    /// Render as a `SocketAddr` for bind paths.
    ///
    /// Brackets around an IPv6 host are stripped before parsing, so the
    /// pinned `[::1]` wildcard literal resolves like any other v6 host.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        let host = strip_brackets(&self.host);
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ListenError::AddressFormat(self.to_string()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Parse a "host:port" string for the given network family token.
///
/// Splits on the last colon, so unbracketed IPv6 hosts keep their inner
/// colons. An empty host becomes the family wildcard. A malformed port
/// component silently yields port zero; the registry favors availability
/// over strict validation here.
pub fn normalize(network: &str, address: &str) -> Result<NormalizedAddr> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ListenError::AddressFormat(address.to_string()))?;

    let host = if host.is_empty() {
        match network {
            "tcp" | "tcp4" | "udp" | "udp4" => WILDCARD_V4.to_string(),
            "tcp6" | "udp6" => WILDCARD_V6.to_string(),
            _ => return Err(ListenError::UnsupportedNetwork(network.to_string())),
        }
    } else {
        match network {
            "tcp" | "tcp4" | "tcp6" | "udp" | "udp4" | "udp6" => {
                strip_brackets(host).to_string()
            }
            _ => return Err(ListenError::UnsupportedNetwork(network.to_string())),
        }
    };

    // Lenient on purpose: "8o8o" or an out-of-range value is port 0
    let port = port.parse::<u16>().unwrap_or(0);

    Ok(NormalizedAddr { host, port })
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

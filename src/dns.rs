use std::net::SocketAddr;

use log::debug;
use tokio::net::lookup_host;

use crate::error::{RconError, Result};

/// Port DarkPlaces servers listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 26000;

/// Which address families a lookup may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddressFamily {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }
}

fn parse_port(text: &str, addr: &str) -> Result<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RconError::InvalidAddress(addr.to_owned(), "port is not a number"));
    }
    match text.parse::<u16>() {
        Ok(0) => Err(RconError::InvalidAddress(addr.to_owned(), "port can't be zero")),
        Ok(port) => Ok(port),
        Err(_) => Err(RconError::InvalidAddress(addr.to_owned(), "port is out of range")),
    }
}

fn is_ipv6_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '%')
}

/// Split `host`, `host:port`, `[ipv6]` or `[ipv6]:port` into host and port.
///
/// ```
/// use dprcon::dns::parse_server_addr;
///
/// assert_eq!(parse_server_addr("hostname", 1234).unwrap(), ("hostname".to_owned(), 1234));
/// assert_eq!(parse_server_addr("[::1]:26001", 26000).unwrap(), ("::1".to_owned(), 26001));
/// ```
pub fn parse_server_addr(addr: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| RconError::InvalidAddress(addr.to_owned(), "unclosed bracket"))?;
        if host.is_empty() || !host.chars().all(is_ipv6_char) {
            return Err(RconError::InvalidAddress(addr.to_owned(), "bad ipv6 address"));
        }
        let port = match tail {
            "" => None,
            tail => Some(tail.strip_prefix(':').ok_or_else(|| {
                RconError::InvalidAddress(addr.to_owned(), "unexpected data after ipv6 address")
            })?),
        };
        (host, port)
    } else {
        let (host, port) = match addr.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        };
        if host.is_empty() || host.contains(['[', ']']) {
            return Err(RconError::InvalidAddress(addr.to_owned(), "bad host"));
        }
        (host, port)
    };

    let port = match port {
        Some(port) => parse_port(port, addr)?,
        None if default_port == 0 => {
            return Err(RconError::InvalidAddress(addr.to_owned(), "port can't be zero"))
        }
        None => default_port,
    };

    Ok((host.to_owned(), port))
}

/// Resolve `host:port`, keeping only results of `family`.
pub async fn lookup(host: &str, port: u16, family: AddressFamily) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| RconError::Resolve {
            host: host.to_owned(),
            source,
        })?
        .filter(|addr| family.accepts(addr))
        .collect();

    debug!("{} resolved to {:?}", host, addrs);
    Ok(addrs)
}

/// First IPv4 result if there is one, otherwise the first result.
pub fn prefer_ipv4(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

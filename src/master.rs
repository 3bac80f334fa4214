//! Master server queries: `getservers` requests and the packed address list
//! that comes back.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use log::{debug, trace};

use crate::{
    client::{connect_socket, PacketStream},
    dns::{self, AddressFamily},
    error::{RconError, Result},
    packet::PACKET_HEADER,
};

/// Marker plus `getserversResponse`, 22 bytes.
pub const GETSERVERS_RESPONSE_HEADER: &[u8] = b"\xFF\xFF\xFF\xFFgetserversResponse";
const ADDRESS_BLOCK_SIZE: usize = 7; // '\' + 4 bytes ip + 2 bytes port
const END_OF_TRANSMISSION: &[u8] = b"\\EOT\x00\x00\x00";

pub const DEFAULT_MASTER: &str = "dpmaster.deathmask.net";
pub const DEFAULT_MASTER_PORT: u16 = 27950;

/// `getservers <game> <protocol> empty full`
pub fn build_getservers_request(game: &str, protocol: u32) -> Vec<u8> {
    let mut packet = PACKET_HEADER.to_vec();
    packet.extend(format!("getservers {} {} empty full", game, protocol).into_bytes());
    packet
}

/// Lazily decoded server list of one `getserversResponse` packet.
///
/// Yields addresses until the `\EOT` terminator. A block with a bad leading
/// byte, or data ending before the terminator, yields one error and then
/// ends.
#[derive(Debug, Clone)]
pub struct ServerList<'a> {
    data: &'a [u8],
    done: bool,
}

impl Iterator for ServerList<'_> {
    type Item = Result<SocketAddrV4>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.data.len() < ADDRESS_BLOCK_SIZE {
            self.done = true;
            return Some(Err(RconError::malformed(
                "server list ends without EOT marker",
            )));
        }

        let (block, rest) = self.data.split_at(ADDRESS_BLOCK_SIZE);
        self.data = rest;

        if block == END_OF_TRANSMISSION {
            self.done = true;
            return None;
        }

        if block[0] != b'\\' {
            self.done = true;
            return Some(Err(RconError::malformed(format!(
                "bad server list block start 0x{:02x}",
                block[0]
            ))));
        }

        let ip = Ipv4Addr::new(block[1], block[2], block[3], block[4]);
        let port = u16::from_be_bytes([block[5], block[6]]);
        Some(Ok(SocketAddrV4::new(ip, port)))
    }
}

pub fn parse_getservers_response(packet: &[u8]) -> Result<ServerList<'_>> {
    let data = packet
        .strip_prefix(GETSERVERS_RESPONSE_HEADER)
        .ok_or_else(|| RconError::malformed("missing getservers response header"))?;
    Ok(ServerList { data, done: false })
}

/// Ask a master server for the servers of `game`. Masters answer with as
/// many packets as the list needs, so replies are collected until `timeout`.
/// Servers listed more than once are returned once, in first-seen order.
pub async fn query_master(
    host: &str,
    port: u16,
    game: &str,
    protocol: u32,
    timeout: Duration,
) -> Result<Vec<SocketAddrV4>> {
    let addrs = dns::lookup(host, port, AddressFamily::Any).await?;
    let addr = dns::prefer_ipv4(&addrs).ok_or_else(|| RconError::NoAddress(host.to_owned()))?;
    let socket = connect_socket(addr).await?;

    trace!("sending getservers request to {}", addr);
    socket
        .send(&build_getservers_request(game, protocol))
        .await
        .map_err(RconError::SendError)?;

    let mut servers = Vec::new();
    let mut seen = HashSet::new();
    let mut stream = PacketStream::new(&socket, timeout);
    loop {
        let packet = match stream.next_with_header(GETSERVERS_RESPONSE_HEADER).await {
            Ok(packet) => packet,
            Err(RconError::TimeoutError(_)) => break,
            Err(e) => return Err(e),
        };

        for server in parse_getservers_response(&packet)? {
            let server = server?;
            if seen.insert(server) {
                servers.push(server);
            }
        }
    }

    debug!("master {} listed {} servers", host, servers.len());
    Ok(servers)
}

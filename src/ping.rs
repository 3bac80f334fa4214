//! Latency probing with the connectionless ping/pong packets.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::net::UdpSocket;

use crate::{
    clock::Clock,
    dns::{self, AddressFamily},
    error::{RconError, Result},
    packet::{self, MAX_PACKET_SIZE},
    stats::PingStats,
};

/// Which ping/pong pair the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingProtocol {
    #[default]
    Q2,
    Q3,
    QFusion,
}

impl PingProtocol {
    pub fn ping_packet(self) -> &'static [u8] {
        match self {
            PingProtocol::Q2 => packet::PING_Q2_PACKET,
            PingProtocol::Q3 => packet::PING_Q3_PACKET,
            PingProtocol::QFusion => packet::PING_QFUSION_PACKET,
        }
    }

    pub fn pong_packet(self) -> &'static [u8] {
        match self {
            PingProtocol::Q2 => packet::PONG_Q2_PACKET,
            PingProtocol::Q3 => packet::PONG_Q3_PACKET,
            PingProtocol::QFusion => packet::PONG_QFUSION_PACKET,
        }
    }
}

impl FromStr for PingProtocol {
    type Err = RconError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "q2" => Ok(PingProtocol::Q2),
            "q3" => Ok(PingProtocol::Q3),
            "qfusion" => Ok(PingProtocol::QFusion),
            other => Err(RconError::InvalidConfig(format!(
                "unknown ping protocol {other:?}"
            ))),
        }
    }
}

/// Non-blocking datagram socket with a readiness wait.
#[allow(async_fn_in_trait)]
pub trait PingSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Wait until the socket may have data, for at most `timeout`. Returns
    /// `false` on timeout. A `true` is only a hint: the following
    /// [`PingSocket::try_recv_from`] may still report `WouldBlock`.
    async fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl PingSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        match tokio::time::timeout(timeout, self.readable()).await {
            Ok(ready) => ready.map(|()| true),
            Err(_) => Ok(false),
        }
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::try_recv_from(self, buf)
    }
}

/// Resolve the server, returning the first address of `family`.
pub async fn find_server(host: &str, port: u16, family: AddressFamily) -> Result<SocketAddr> {
    dns::lookup(host, port, family)
        .await?
        .first()
        .copied()
        .ok_or_else(|| RconError::NoAddress(host.to_owned()))
}

/// Unconnected socket of the same family as `target`, so the source of
/// every reply can be checked.
pub async fn make_socket(target: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    UdpSocket::bind(local).await.map_err(RconError::UnreachableHost)
}

/// Something observed while pinging, for progress output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PingEvent {
    Reply { seq: u64, rtt: Duration },
    Lost { seq: u64 },
    Duplicate { seq: u64 },
}

pub type PingCallback = Box<dyn FnMut(&PingEvent)>;

/// Sends probes to one server and keeps [`PingStats`].
///
/// Each probe gets `interval` to be answered. Counters are updated as soon
/// as each step completes, so dropping the future returned by
/// [`Pinger::do_ping`] (e.g. on Ctrl-C) leaves consistent statistics behind:
/// at most the last probe is neither received nor lost.
pub struct Pinger<S, C> {
    socket: S,
    clock: C,
    target: SocketAddr,
    protocol: PingProtocol,
    stats: PingStats,
    callback: Option<PingCallback>,
}

impl<S: PingSocket, C: Clock> Pinger<S, C> {
    pub fn new(socket: S, clock: C, target: SocketAddr, protocol: PingProtocol) -> Self {
        Pinger {
            socket,
            clock,
            target,
            protocol,
            stats: PingStats::new(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: impl FnMut(&PingEvent) + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn stats(&self) -> &PingStats {
        &self.stats
    }

    pub fn into_stats(self) -> PingStats {
        self.stats
    }

    fn emit(&mut self, event: PingEvent) {
        if let Some(callback) = self.callback.as_mut() {
            callback(&event);
        }
    }

    /// Send `count` probes, `interval` apart (0 means until cancelled).
    pub async fn do_ping(&mut self, count: u64, interval: Duration) -> Result<()> {
        loop {
            let started = self.clock.now();
            let deadline = started.saturating_add(interval);

            self.socket
                .send_to(self.protocol.ping_packet(), self.target)
                .await
                .map_err(RconError::SendError)?;
            self.stats.packets_sent += 1;
            let seq = self.stats.packets_sent;
            trace!("sent probe {} to {}", seq, self.target);

            if self.wait_response(deadline).await? {
                let rtt = self.clock.now().saturating_sub(started);
                self.stats.packets_received += 1;
                self.stats.update(rtt);
                self.emit(PingEvent::Reply { seq, rtt });
            } else {
                self.stats.packets_lost += 1;
                debug!("probe {} lost", seq);
                self.emit(PingEvent::Lost { seq });
            }

            if count != 0 && self.stats.packets_sent >= count {
                break;
            }

            // anything else matching before the next probe is a duplicate
            while self.clock.now() < deadline {
                if self.wait_response(deadline).await? {
                    self.stats.packets_duplicated += 1;
                    warn!("duplicate pong for probe {}", seq);
                    self.emit(PingEvent::Duplicate { seq });
                }
            }
        }
        Ok(())
    }

    /// Wait until a pong from the target arrives or `deadline` passes.
    async fn wait_response(&self, deadline: Duration) -> Result<bool> {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            let now = self.clock.now();
            if now >= deadline {
                return Ok(false);
            }

            let ready = self
                .socket
                .wait_readable(deadline - now)
                .await
                .map_err(RconError::ReceiveError)?;
            if !ready {
                return Ok(false);
            }

            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    if from == self.target && &buf[..len] == self.protocol.pong_packet() {
                        return Ok(true);
                    }
                    debug!("ignoring {} bytes from {}", len, from);
                }
                // readiness without data, keep waiting
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(RconError::ReceiveError(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_packets() {
        assert_eq!(PingProtocol::Q3.ping_packet(), b"ping");
        assert_eq!(PingProtocol::Q3.pong_packet(), b"\xFF\xFF\xFF\xFFdisconnect");
        assert_eq!(PingProtocol::QFusion.pong_packet(), b"\xFF\xFF\xFF\xFFack ");
        assert_eq!(PingProtocol::default().pong_packet(), b"\xFF\xFF\xFF\xFFack");
    }

    #[test]
    fn protocol_names() {
        assert_eq!("q3".parse::<PingProtocol>().unwrap(), PingProtocol::Q3);
        assert_eq!("qfusion".parse::<PingProtocol>().unwrap(), PingProtocol::QFusion);
        assert!("q4".parse::<PingProtocol>().is_err());
    }
}

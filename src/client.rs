use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::{debug, trace};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use crate::{
    dns::{self, AddressFamily},
    error::{RconError, Result},
    packet::{self, SecureRcon, MAX_PACKET_SIZE},
    status::{self, ServerStatus},
};

/// How long `send()` waits for a challenge in [`SecureRcon::Challenge`] mode.
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time to collect rcon replies.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(700);

// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `timeout` from now. Huge timeouts end up far in the future instead of
/// overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Simple asynchronous rcon client for DarkPlaces and Quake servers. Call
/// `connect()` to open the socket and `close()` when done.
///
/// The configured timeout (see [`Client::set_timeout`]) applies to each
/// datagram sent on the connected socket and to the status query. Methods
/// reading replies take their timeout as an argument, except the challenge
/// wait inside `send()`, which uses [`CHALLENGE_TIMEOUT`].
///
/// ## Example
/// ```no_run
/// use dprcon::client::Client;
/// use dprcon::packet::SecureRcon;
/// use std::error::Error;
/// use std::time::Duration;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let mut client = Client::new("127.0.0.1", 26000, "<put rcon password here>", SecureRcon::Time);
///     client.connect().await?;
///     let response = client.execute("status", Duration::from_millis(700)).await?;
///     client.close()?;
///
///     println!("{}", String::from_utf8_lossy(&response));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    host: String,
    port: u16,
    password: Vec<u8>,
    secure_rcon: SecureRcon,
    timeout: Duration,
    socket: Option<UdpSocket>,
}

/// Datagrams received on a connected socket until a deadline.
///
/// Every call to [`PacketStream::next_packet`] is a single `recv`. Once the
/// deadline computed at creation passes, it fails with
/// [`RconError::TimeoutError`].
pub struct PacketStream<'a> {
    socket: &'a UdpSocket,
    deadline: Instant,
    buf: [u8; MAX_PACKET_SIZE],
}

impl<'a> PacketStream<'a> {
    pub fn new(socket: &'a UdpSocket, timeout: Duration) -> Self {
        PacketStream {
            socket,
            deadline: deadline_after(timeout),
            buf: [0; MAX_PACKET_SIZE],
        }
    }

    pub async fn next_packet(&mut self) -> Result<Vec<u8>> {
        let len = timeout_at(self.deadline, self.socket.recv(&mut self.buf))
            .await?
            .map_err(RconError::ReceiveError)?;
        trace!("received {} bytes", len);
        Ok(self.buf[..len].to_vec())
    }

    /// Skip datagrams until one starts with `header`.
    pub async fn next_with_header(&mut self, header: &[u8]) -> Result<Vec<u8>> {
        loop {
            let packet = self.next_packet().await?;
            if packet.starts_with(header) {
                return Ok(packet);
            }
            debug!("discarding {} byte packet with unexpected header", packet.len());
        }
    }
}

/// Open a UDP socket of the right family and connect it to `addr`.
pub(crate) async fn connect_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(RconError::UnreachableHost)?;
    socket
        .connect(addr)
        .await
        .map_err(RconError::UnreachableHost)?;
    Ok(socket)
}

impl Client {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: impl AsRef<[u8]>,
        secure_rcon: SecureRcon,
    ) -> Self {
        Client {
            host: host.into(),
            port,
            password: password.as_ref().to_vec(),
            secure_rcon,
            timeout: DEFAULT_TIMEOUT,
            socket: None,
        }
    }

    /// Build a client from a `host[:port]` string, see
    /// [`dns::parse_server_addr`].
    pub fn from_server_str(
        server: &str,
        password: impl AsRef<[u8]>,
        secure_rcon: SecureRcon,
        timeout: Duration,
    ) -> Result<Self> {
        let (host, port) = dns::parse_server_addr(server, dns::DEFAULT_PORT)?;
        let mut client = Client::new(host, port, password, secure_rcon);
        client.timeout = timeout;
        Ok(client)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secure_rcon(&self) -> SecureRcon {
        self.secure_rcon
    }

    pub fn set_secure_rcon(&mut self, secure_rcon: SecureRcon) {
        self.secure_rcon = secure_rcon;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bounds every send and [`Client::get_status`]. Reads take their own
    /// timeout per call.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Resolve the server and open a socket connected to it. IPv4 results
    /// are preferred over IPv6 ones.
    pub async fn connect(&mut self) -> Result<()> {
        let addrs = dns::lookup(&self.host, self.port, AddressFamily::Any).await?;
        let addr = dns::prefer_ipv4(&addrs).ok_or_else(|| RconError::NoAddress(self.host.clone()))?;

        let socket = connect_socket(addr).await?;
        trace!("opened udp socket to {}", addr);

        if self.socket.replace(socket).is_some() {
            debug!("replaced previously connected socket");
        }
        Ok(())
    }

    /// Release the socket. Closing a client that isn't connected is an error.
    pub fn close(&mut self) -> Result<()> {
        self.socket.take().map(drop).ok_or(RconError::NotConnected)
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or(RconError::NotConnected)
    }

    async fn send_packet(&self, packet: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        timeout_at(deadline_after(self.timeout), socket.send(packet))
            .await?
            .map_err(RconError::SendError)?;
        Ok(())
    }

    /// Send an rcon command signed according to the configured
    /// [`SecureRcon`] mode.
    pub async fn send(&self, command: impl AsRef<[u8]>) -> Result<()> {
        let command = command.as_ref();
        let packet = match self.secure_rcon {
            SecureRcon::Plain => packet::build_plain_rcon(&self.password, command),
            SecureRcon::Time => {
                packet::build_time_signed_rcon(&self.password, command, packet::unix_time_now())?
            }
            SecureRcon::Challenge => {
                let challenge = self.get_challenge(CHALLENGE_TIMEOUT).await?;
                packet::build_challenge_signed_rcon(&self.password, challenge, command)?
            }
        };

        trace!("sending {:?} rcon packet to server", self.secure_rcon);
        self.send_packet(&packet).await
    }

    /// Stream of raw datagrams which fails once `timeout` has passed.
    pub fn read_iterator(&self, timeout: Duration) -> Result<PacketStream<'_>> {
        Ok(PacketStream::new(self.socket()?, timeout))
    }

    /// Payload of the first rcon reply. Other packets are dropped. Running
    /// out of time is an error.
    pub async fn read_once(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut stream = self.read_iterator(timeout)?;
        let packet = stream.next_with_header(packet::RCON_RESPONSE_HEADER).await?;
        Ok(packet::parse_rcon_reply(&packet)?.to_vec())
    }

    /// Concatenated payloads of all rcon replies received before `timeout`.
    ///
    /// Servers split long output over several packets without marking the
    /// last one, so here the timeout is the normal way to finish and an
    /// empty result means nothing arrived. Compare [`Client::read_once`],
    /// where a timeout is an error.
    pub async fn read_until(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut stream = self.read_iterator(timeout)?;
        let mut data = Vec::new();

        loop {
            match stream.next_with_header(packet::RCON_RESPONSE_HEADER).await {
                Ok(packet) => data.extend_from_slice(packet::parse_rcon_reply(&packet)?),
                Err(RconError::TimeoutError(_)) => break,
                Err(e) => return Err(e),
            }
        }

        trace!("collected {} bytes of rcon output", data.len());
        Ok(data)
    }

    /// Run an rcon command and collect its output for `timeout`.
    pub async fn execute(&self, command: impl AsRef<[u8]>, timeout: Duration) -> Result<Vec<u8>> {
        self.send(command).await?;
        self.read_until(timeout).await
    }

    /// Ask the server for a challenge to sign the next command with.
    pub async fn get_challenge(&self, timeout: Duration) -> Result<Vec<u8>> {
        trace!("requesting challenge");
        self.send_packet(packet::CHALLENGE_PACKET).await?;

        let mut stream = self.read_iterator(timeout)?;
        let response = stream
            .next_with_header(packet::CHALLENGE_RESPONSE_HEADER)
            .await?;
        packet::parse_challenge(&response)
    }

    /// Query `getstatus`, waiting at most the client's timeout.
    pub async fn get_status(&self) -> Result<ServerStatus> {
        trace!("requesting status");
        self.send_packet(packet::STATUS_PACKET).await?;

        let mut stream = self.read_iterator(self.timeout)?;
        let response = stream
            .next_with_header(packet::STATUS_RESPONSE_HEADER)
            .await?;
        status::parse_status(&response)
    }
}

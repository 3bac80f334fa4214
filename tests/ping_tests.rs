// Ping engine tests. Most use a scripted socket driven by a fake clock so
// timing is exact; one runs over loopback.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use dprcon::clock::{Clock, MonotonicClock};
use dprcon::packet;
use dprcon::RconError;
use dprcon::ping::{self, PingEvent, PingProtocol, PingSocket, Pinger};
use tokio::net::UdpSocket;

const INTERVAL: Duration = Duration::from_secs(1);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn server_addr() -> SocketAddr {
    "10.0.0.1:26000".parse().unwrap()
}

#[derive(Clone, Default)]
struct FakeClock(Rc<Cell<Duration>>);

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

struct Datagram {
    arrival: Duration,
    data: Vec<u8>,
    from: SocketAddr,
}

/// Datagrams to deliver for probe number `n` (1 based): delay after the
/// probe was sent, payload and source.
type Script = Box<dyn Fn(u64) -> Vec<(Duration, Vec<u8>, SocketAddr)>>;

struct ScriptedSocket {
    clock: FakeClock,
    script: Script,
    probes: Cell<u64>,
    inbox: RefCell<Vec<Datagram>>,
    /// Readiness reports to give before there is anything to read.
    spurious_wakeups: Cell<u32>,
    /// Never become readable again once this many probes were sent.
    hang_after: Option<u64>,
    /// Report readiness and fail every read once this many probes were sent.
    refuse_after: Option<u64>,
}

impl ScriptedSocket {
    fn new(
        clock: &FakeClock,
        script: impl Fn(u64) -> Vec<(Duration, Vec<u8>, SocketAddr)> + 'static,
    ) -> Self {
        ScriptedSocket {
            clock: clock.clone(),
            script: Box::new(script),
            probes: Cell::new(0),
            inbox: RefCell::new(Vec::new()),
            spurious_wakeups: Cell::new(0),
            hang_after: None,
            refuse_after: None,
        }
    }

    fn refusing(&self) -> bool {
        self.refuse_after.is_some_and(|n| self.probes.get() >= n)
    }

    fn next_arrival(&self) -> Option<Duration> {
        self.inbox.borrow().first().map(|d| d.arrival)
    }
}

impl PingSocket for ScriptedSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        assert_eq!(target, server_addr());
        assert_eq!(buf, packet::PING_Q2_PACKET);

        let probe = self.probes.get() + 1;
        self.probes.set(probe);

        let now = self.clock.now();
        let mut inbox = self.inbox.borrow_mut();
        for (delay, data, from) in (self.script)(probe) {
            inbox.push(Datagram {
                arrival: now + delay,
                data,
                from,
            });
        }
        inbox.sort_by_key(|d| d.arrival);
        Ok(buf.len())
    }

    async fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        if self.hang_after.is_some_and(|n| self.probes.get() >= n) {
            std::future::pending::<()>().await;
        }
        if self.refusing() {
            return Ok(true);
        }

        if self.spurious_wakeups.get() > 0 {
            self.spurious_wakeups.set(self.spurious_wakeups.get() - 1);
            return Ok(true);
        }

        let now = self.clock.now();
        match self.next_arrival() {
            Some(arrival) if arrival <= now.saturating_add(timeout) => {
                self.clock.0.set(arrival.max(now));
                Ok(true)
            }
            _ => {
                self.clock.0.set(now.saturating_add(timeout));
                Ok(false)
            }
        }
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.refusing() {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        let mut inbox = self.inbox.borrow_mut();
        if !inbox.first().is_some_and(|d| d.arrival <= self.clock.now()) {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let d = inbox.remove(0);
        buf[..d.data.len()].copy_from_slice(&d.data);
        Ok((d.data.len(), d.from))
    }
}

fn pong(delay: Duration) -> (Duration, Vec<u8>, SocketAddr) {
    (delay, packet::PONG_Q2_PACKET.to_vec(), server_addr())
}

fn pinger(socket: ScriptedSocket, clock: &FakeClock) -> Pinger<ScriptedSocket, FakeClock> {
    Pinger::new(socket, clock.clone(), server_addr(), PingProtocol::Q2)
}

#[tokio::test]
async fn every_probe_answered() {
    let clock = FakeClock::default();
    let socket = ScriptedSocket::new(&clock, |_| vec![pong(ms(50))]);
    let mut pinger = pinger(socket, &clock);

    pinger.do_ping(5, INTERVAL).await.unwrap();

    let stats = pinger.stats();
    assert_eq!(stats.packets_sent, 5);
    assert_eq!(stats.packets_received, 5);
    assert_eq!(stats.packets_lost, 0);
    assert_eq!(stats.packets_duplicated, 0);

    let report = stats.report().unwrap();
    assert!((report.avg - 0.05).abs() < 1e-9);
    assert!(report.mdev < 1e-6);
    // the loop stops right after the last reply instead of waiting out
    // the interval
    assert_eq!(clock.now(), ms(4050));
}

#[tokio::test]
async fn alternating_loss() {
    let clock = FakeClock::default();
    let socket = ScriptedSocket::new(&clock, |n| if n % 2 == 1 { vec![pong(ms(30))] } else { vec![] });
    let mut pinger = pinger(socket, &clock);

    pinger.do_ping(6, INTERVAL).await.unwrap();

    let stats = pinger.stats();
    assert_eq!(stats.packets_sent, 6);
    assert_eq!(stats.packets_received, 3);
    assert_eq!(stats.packets_lost, 3);
    assert!((stats.loss_percent() - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn duplicates_are_counted() {
    let clock = FakeClock::default();
    let socket = ScriptedSocket::new(&clock, |_| vec![pong(ms(20)), pong(ms(40))]);
    let mut pinger = pinger(socket, &clock);

    pinger.do_ping(4, INTERVAL).await.unwrap();

    let stats = pinger.stats();
    assert_eq!(stats.packets_received, 4);
    // the last probe's copy arrives after the loop ended
    assert_eq!(stats.packets_duplicated, 3);
    assert!((stats.report().unwrap().max - 0.02).abs() < 1e-9);
}

#[tokio::test]
async fn foreign_packets_are_ignored() {
    let clock = FakeClock::default();
    let stranger: SocketAddr = "10.0.0.2:26000".parse().unwrap();
    let socket = ScriptedSocket::new(&clock, move |_| {
        vec![
            (ms(10), packet::PONG_Q2_PACKET.to_vec(), stranger),
            (ms(20), packet::PONG_QFUSION_PACKET.to_vec(), server_addr()),
            (ms(30), b"\xFF\xFF\xFF\xFFnjunk".to_vec(), server_addr()),
            pong(ms(70)),
        ]
    });
    let mut pinger = pinger(socket, &clock);

    pinger.do_ping(2, INTERVAL).await.unwrap();

    let stats = pinger.stats();
    assert_eq!(stats.packets_received, 2);
    assert_eq!(stats.packets_duplicated, 0);
    assert!((stats.report().unwrap().min - 0.07).abs() < 1e-9);
}

#[tokio::test]
async fn spurious_wakeups_are_not_errors() {
    let clock = FakeClock::default();
    let mut socket = ScriptedSocket::new(&clock, |_| vec![pong(ms(10))]);
    socket.spurious_wakeups = Cell::new(3);
    let mut pinger = pinger(socket, &clock);

    pinger.do_ping(2, INTERVAL).await.unwrap();

    assert_eq!(pinger.stats().packets_received, 2);
    assert_eq!(pinger.stats().packets_lost, 0);
}

#[tokio::test]
async fn events_are_reported() {
    let clock = FakeClock::default();
    let socket = ScriptedSocket::new(&clock, |n| match n {
        1 => vec![pong(ms(10)), pong(ms(15))],
        2 => vec![],
        _ => vec![pong(ms(25))],
    });

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let mut pinger = pinger(socket, &clock).with_callback(move |event| sink.borrow_mut().push(*event));

    pinger.do_ping(3, INTERVAL).await.unwrap();

    assert_eq!(
        *events.borrow(),
        vec![
            PingEvent::Reply { seq: 1, rtt: ms(10) },
            PingEvent::Duplicate { seq: 1 },
            PingEvent::Lost { seq: 2 },
            PingEvent::Reply { seq: 3, rtt: ms(25) },
        ]
    );
}

#[tokio::test]
async fn cancellation_keeps_counters_consistent() {
    let clock = FakeClock::default();
    let mut socket = ScriptedSocket::new(&clock, |_| vec![pong(ms(10))]);
    socket.hang_after = Some(3);
    let mut pinger = pinger(socket, &clock);

    let cancelled = tokio::time::timeout(ms(50), pinger.do_ping(0, INTERVAL)).await;
    assert!(cancelled.is_err());

    let stats = pinger.into_stats();
    assert_eq!(stats.packets_sent, 3);
    assert_eq!(stats.packets_received, 2);
    assert_eq!(stats.packets_lost, 0);
    assert!(stats.report().is_some());
}

#[tokio::test]
async fn receive_errors_stop_the_loop() {
    let clock = FakeClock::default();
    let mut socket = ScriptedSocket::new(&clock, |_| vec![pong(ms(10))]);
    socket.refuse_after = Some(2);
    let mut pinger = pinger(socket, &clock);

    let err = pinger.do_ping(5, INTERVAL).await.unwrap_err();
    assert!(
        matches!(err, RconError::ReceiveError(ref e) if e.kind() == io::ErrorKind::ConnectionRefused),
        "{err:?}"
    );

    let stats = pinger.stats();
    assert_eq!(stats.packets_sent, 2);
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.packets_lost, 0);
    assert!(stats.packets_received + stats.packets_lost <= stats.packets_sent);
}

#[tokio::test]
async fn huge_interval_does_not_overflow() {
    let clock = FakeClock::default();
    let socket = ScriptedSocket::new(&clock, |_| vec![pong(ms(10))]);
    let mut pinger = pinger(socket, &clock);

    pinger.do_ping(1, Duration::MAX).await.unwrap();

    assert_eq!(pinger.stats().packets_received, 1);
    assert_eq!(clock.now(), ms(10));
}

#[tokio::test]
async fn ping_over_loopback() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((len, from)) = server.recv_from(&mut buf).await {
            if &buf[..len] == packet::PING_Q3_PACKET {
                let _ = server.send_to(packet::PONG_Q3_PACKET, from).await;
            }
        }
    });

    let found = ping::find_server("127.0.0.1", target.port(), Default::default())
        .await
        .unwrap();
    assert_eq!(found, target);

    let socket = ping::make_socket(target).await.unwrap();
    let mut pinger = Pinger::new(socket, MonotonicClock::new(), target, PingProtocol::Q3);
    pinger.do_ping(3, ms(200)).await.unwrap();

    let stats = pinger.stats();
    assert_eq!(stats.packets_sent, 3);
    assert_eq!(stats.packets_received, 3);
    assert_eq!(stats.packets_lost, 0);

    responder.abort();
}

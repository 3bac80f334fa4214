use std::fmt;
use std::time::Duration;

/// Counters and running RTT totals of a ping session. Only sums are kept, so
/// an update costs the same no matter how many samples came before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Probes whose whole interval passed without a pong. May be one less
    /// than `packets_sent - packets_received` if the session was interrupted
    /// while waiting.
    pub packets_lost: u64,
    pub packets_duplicated: u64,
    rtt_min: Option<f64>,
    rtt_max: Option<f64>,
    rtt_sum: f64,
    rtt_sum2: f64,
}

/// RTT figures in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttReport {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Population standard deviation.
    pub mdev: f64,
}

impl PingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one RTT sample. Does not touch the packet counters.
    pub fn update(&mut self, rtt: Duration) {
        let rtt = rtt.as_secs_f64();
        self.rtt_min = Some(self.rtt_min.map_or(rtt, |min| min.min(rtt)));
        self.rtt_max = Some(self.rtt_max.map_or(rtt, |max| max.max(rtt)));
        self.rtt_sum += rtt;
        self.rtt_sum2 += rtt * rtt;
    }

    /// `None` until at least one packet was received.
    pub fn report(&self) -> Option<RttReport> {
        if self.packets_received == 0 {
            return None;
        }

        let received = self.packets_received as f64;
        let avg = self.rtt_sum / received;
        // sum2/n - avg^2 can come out slightly negative from rounding when
        // all samples are (nearly) equal; the real value is then ~0
        let variance = (self.rtt_sum2 / received - avg * avg).max(0.0);

        Some(RttReport {
            min: self.rtt_min.unwrap_or_default(),
            avg,
            max: self.rtt_max.unwrap_or_default(),
            mdev: variance.sqrt(),
        })
    }

    pub fn loss_percent(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        let lost = self.packets_sent.saturating_sub(self.packets_received);
        lost as f64 / self.packets_sent as f64 * 100.0
    }
}

/// ping(8) style summary, without the leading `--- host ping statistics ---`
/// line.
impl fmt::Display for PingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets transmitted, {} received,",
            self.packets_sent, self.packets_received
        )?;
        if self.packets_duplicated > 0 {
            write!(f, " {} duplicated,", self.packets_duplicated)?;
        }
        writeln!(f, " {:.1}% packet loss", self.loss_percent())?;

        if self.packets_duplicated > 0 {
            writeln!(f, "WARNING: Results might be incorrect because of duplicated packets")?;
        }

        if let Some(rtt) = self.report() {
            write!(
                f,
                "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
                rtt.min * 1000.0,
                rtt.avg * 1000.0,
                rtt.max * 1000.0,
                rtt.mdev * 1000.0
            )?;
        }
        Ok(())
    }
}

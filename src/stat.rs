use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

/// Sample is one echo request of a run and, once answered, its reply.
/// Samples are identified by their sequence number.
#[derive(Default, Clone, Debug)]
pub struct Sample {
    /// The timestamp when the echo request is sent, in ns since the epoch.
    pub txts: u128,
    /// The timestamp when the echo reply is received, in ns since the epoch.
    pub rxts: u128,
    /// The sequence number of the echo request.
    pub seq: u16,
    /// The round trip time, in ns.
    pub latency: u128,
    /// Received is true once the echo reply has arrived.
    pub received: bool,
    /// Bitflip is true if the echo reply arrived with a corrupted payload.
    pub bitflip: bool,
}

impl Sample {
    /// Create a sample for a request sent at `txts`.
    pub fn new(txts: u128, seq: u16) -> Self {
        Sample {
            txts,
            seq,
            ..Default::default()
        }
    }

    /// Calculate the round trip time of the sample.
    pub fn calc_latency(&mut self) {
        self.latency = self.rxts.saturating_sub(self.txts);
    }
}

/// What a reply turned out to be once matched against the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// First reply for a request of this run.
    Fresh,
    /// The request was already answered.
    Duplicate,
    /// No request with this sequence number was sent.
    Unknown,
}

/// Bucket stores the samples of one run, shared by the sender and the receiver.
#[derive(Default)]
pub struct Bucket {
    samples: RwLock<BTreeMap<u16, Sample>>,
    duplicates: RwLock<u32>,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Bucket::default()
    }

    /// Record an echo request just before it goes out.
    pub fn add(&self, sample: Sample) {
        let mut map = self.samples.write().unwrap_or_else(|e| e.into_inner());
        map.insert(sample.seq, sample);
    }

    /// Record an echo reply. The latency is measured against the request's txts.
    pub fn add_reply(&self, seq: u16, rxts: u128, bitflip: bool) -> Reply {
        let mut map = self.samples.write().unwrap_or_else(|e| e.into_inner());
        let sample = match map.get_mut(&seq) {
            Some(sample) => sample,
            None => return Reply::Unknown,
        };

        if sample.received {
            drop(map);
            *self.duplicates.write().unwrap_or_else(|e| e.into_inner()) += 1;
            return Reply::Duplicate;
        }

        sample.rxts = rxts;
        sample.received = true;
        sample.bitflip = bitflip;
        sample.calc_latency();
        Reply::Fresh
    }

    /// Number of requests recorded so far.
    pub fn sent(&self) -> u32 {
        self.samples.read().unwrap_or_else(|e| e.into_inner()).len() as u32
    }

    /// True when every recorded request has been answered.
    pub fn all_received(&self) -> bool {
        let map = self.samples.read().unwrap_or_else(|e| e.into_inner());
        map.values().all(|s| s.received)
    }

    /// Summarize the run.
    pub fn statistics(&self) -> RunStatistics {
        let map = self.samples.read().unwrap_or_else(|e| e.into_inner());
        let duplicates = *self.duplicates.read().unwrap_or_else(|e| e.into_inner());

        let rtts: Vec<Duration> = map
            .values()
            .filter(|s| s.received)
            .map(|s| Duration::from_nanos(s.latency as u64))
            .collect();
        let bitflips = map.values().filter(|s| s.bitflip).count() as u32;

        let mut stats = RunStatistics::from_rtts(map.len() as u32, &rtts);
        stats.duplicates = duplicates;
        stats.bitflips = bitflips;
        stats
    }
}

/// RunStatistics is the summary of one probe run.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct RunStatistics {
    /// Echo requests sent.
    pub packets_sent: u32,
    /// Distinct echo replies received.
    pub packets_received: u32,
    /// Replies received again for an already answered request.
    pub duplicates: u32,
    /// Replies whose payload differs from what was sent.
    pub bitflips: u32,
    /// Lost requests, in percent of sent.
    pub packet_loss: f64,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub avg_rtt: Duration,
    pub std_dev_rtt: Duration,
}

impl RunStatistics {
    /// Build the summary from the number of requests and the rtts of the replies.
    pub fn from_rtts(sent: u32, rtts: &[Duration]) -> Self {
        let received = rtts.len() as u32;
        let packet_loss = if sent == 0 {
            0.0
        } else {
            f64::from(sent.saturating_sub(received)) / f64::from(sent) * 100.0
        };

        let mut stats = RunStatistics {
            packets_sent: sent,
            packets_received: received,
            packet_loss,
            ..Default::default()
        };
        if rtts.is_empty() {
            return stats;
        }

        let total: Duration = rtts.iter().sum();
        let avg = total / received;
        let variance = rtts
            .iter()
            .map(|rtt| {
                let diff = rtt.as_secs_f64() - avg.as_secs_f64();
                diff * diff
            })
            .sum::<f64>()
            / f64::from(received);

        stats.min_rtt = rtts.iter().min().copied().unwrap_or_default();
        stats.max_rtt = rtts.iter().max().copied().unwrap_or_default();
        stats.avg_rtt = avg;
        stats.std_dev_rtt = Duration::from_secs_f64(variance.sqrt());
        stats
    }
}

impl fmt::Display for RunStatistics {
    /// The measurement line. RTTs are truncated to whole milliseconds.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sent: {:3} Received: {:3} Loss: {:.2}% Min: {} Max: {} Avg: {} ",
            self.packets_sent,
            self.packets_received,
            self.packet_loss,
            self.min_rtt.as_millis(),
            self.max_rtt.as_millis(),
            self.avg_rtt.as_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn measurement_line_is_fixed_width() {
        let stats = RunStatistics {
            packets_sent: 100,
            packets_received: 98,
            packet_loss: 2.0,
            min_rtt: ms(10),
            max_rtt: ms(55),
            avg_rtt: ms(23),
            ..Default::default()
        };

        assert_eq!(
            stats.to_string(),
            "Sent: 100 Received:  98 Loss: 2.00% Min: 10 Max: 55 Avg: 23 "
        );
    }

    #[test]
    fn measurement_line_truncates_rtt() {
        let stats = RunStatistics {
            packets_sent: 3,
            packets_received: 3,
            min_rtt: Duration::from_micros(9_999),
            max_rtt: Duration::from_micros(12_500),
            avg_rtt: Duration::from_micros(11_001),
            ..Default::default()
        };

        assert_eq!(
            stats.to_string(),
            "Sent:   3 Received:   3 Loss: 0.00% Min: 9 Max: 12 Avg: 11 "
        );
    }

    #[test]
    fn from_rtts_aggregates() {
        let stats = RunStatistics::from_rtts(4, &[ms(10), ms(30), ms(20)]);

        assert_eq!(stats.packets_sent, 4);
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.packet_loss, 25.0);
        assert_eq!(stats.min_rtt, ms(10));
        assert_eq!(stats.max_rtt, ms(30));
        assert_eq!(stats.avg_rtt, ms(20));
        // sqrt(((10-20)^2 + (30-20)^2 + 0) / 3) ms
        assert_eq!(stats.std_dev_rtt.as_micros(), 8_164);
    }

    #[test]
    fn from_rtts_without_replies() {
        let stats = RunStatistics::from_rtts(5, &[]);
        assert_eq!(stats.packet_loss, 100.0);
        assert_eq!(stats.min_rtt, Duration::ZERO);
        assert_eq!(stats.avg_rtt, Duration::ZERO);
        assert_eq!(
            stats.to_string(),
            "Sent:   5 Received:   0 Loss: 100.00% Min: 0 Max: 0 Avg: 0 "
        );

        assert_eq!(RunStatistics::from_rtts(0, &[]).packet_loss, 0.0);
    }

    #[test]
    fn bucket_matches_replies() {
        let bucket = Bucket::new();
        bucket.add(Sample::new(1_000_000, 0));
        bucket.add(Sample::new(2_000_000, 1));
        bucket.add(Sample::new(3_000_000, 2));
        assert_eq!(bucket.sent(), 3);
        assert!(!bucket.all_received());

        assert_eq!(bucket.add_reply(0, 11_000_000, false), Reply::Fresh);
        assert_eq!(bucket.add_reply(0, 12_000_000, false), Reply::Duplicate);
        assert_eq!(bucket.add_reply(7, 12_000_000, false), Reply::Unknown);
        assert_eq!(bucket.add_reply(2, 33_000_000, true), Reply::Fresh);

        let stats = bucket.statistics();
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.bitflips, 1);
        assert_eq!(stats.min_rtt, ms(10));
        assert_eq!(stats.max_rtt, ms(30));
        assert_eq!(stats.avg_rtt, ms(20));

        assert_eq!(bucket.add_reply(1, 2_500_000, false), Reply::Fresh);
        assert!(bucket.all_received());
    }
}

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "8.8.8.8";
pub const DEFAULT_COUNT: u32 = 100;
pub const DEFAULT_INTERVAL_MS: u64 = 90;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SIZE: usize = 56;
pub const DEFAULT_LOG_FILE: &str = "ping_stats.log";

/// Size of the send timestamp stored at the front of every payload.
pub const MIN_SIZE: usize = 16;

/// Largest payload an IPv4 datagram can carry after the IP and ICMP headers.
pub const MAX_SIZE: usize = 65535 - 20 - 8;

/// Settings of the whole process. Built once at startup and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host name or IPv4 address to ping.
    pub address: String,
    /// Echo requests sent per run.
    pub count: u32,
    /// Delay between two echo requests of a run.
    pub interval: Duration,
    /// Upper bound of one run.
    pub timeout: Duration,
    /// Payload size in bytes.
    pub size: usize,
    /// Dedicated log file, truncated at startup.
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: DEFAULT_ADDRESS.to_string(),
            count: DEFAULT_COUNT,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            size: DEFAULT_SIZE,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl fmt::Display for Config {
    /// The startup echo written to both sinks.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Address: {} Count per interval: {} Interval(msec): {} Timeout(sec): {}",
            self.address,
            self.count,
            self.interval.as_millis(),
            self.timeout.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_echo_line() {
        assert_eq!(
            Config::default().to_string(),
            "Address: 8.8.8.8 Count per interval: 100 Interval(msec): 90 Timeout(sec): 10"
        );
    }
}

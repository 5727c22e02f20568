//! pingstat keeps pinging one host and logs the statistics of every run.
//!
//! A run sends `count` ICMP echo requests, waits at most `timeout` for the
//! replies and reports sent/received counts, loss and min/max/avg RTT. The
//! [`monitor::Monitor`] drives runs forever and fans every report out to the
//! configured [`sink::Sink`]s.

pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod monitor;
pub mod ping;
pub mod privilege;
pub mod sink;
pub mod stat;

pub use config::Config;
pub use error::{PrivilegeError, ProbeError};
pub use monitor::{CancelToken, Monitor, Outcome, Probe};
pub use ping::{ping, IcmpProbe, PingOption};
pub use stat::RunStatistics;

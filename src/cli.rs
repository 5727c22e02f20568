use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{self, Config};

#[derive(Debug, Parser)]
#[clap(
    name = "pingstat",
    version,
    disable_version_flag = true,
    about = "Ping one host forever and log sent/received/loss/rtt statistics of every run."
)]
pub struct Opt {
    #[clap(
        short = 'a',
        long = "address",
        default_value = config::DEFAULT_ADDRESS,
        help = "address to ping"
    )]
    pub address: String,

    #[clap(
        short = 'c',
        long = "count",
        default_value_t = config::DEFAULT_COUNT,
        value_parser = clap::value_parser!(u32).range(1..=65535),
        help = "number of packets per interval"
    )]
    pub count: u32,

    #[clap(
        short = 'i',
        long = "interval",
        default_value_t = config::DEFAULT_INTERVAL_MS,
        help = "interval between pings in milliseconds"
    )]
    pub interval: u64,

    #[clap(
        short = 't',
        long = "timeout",
        default_value_t = config::DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "timeout for interval in seconds"
    )]
    pub timeout: u64,

    #[clap(
        short = 's',
        long = "size",
        default_value_t = config::DEFAULT_SIZE,
        value_parser = parse_size,
        help = "payload size in bytes"
    )]
    pub size: usize,

    #[clap(
        short = 'l',
        long = "log-file",
        default_value = config::DEFAULT_LOG_FILE,
        help = "statistics log file, truncated on start"
    )]
    pub log_file: PathBuf,

    #[clap(short = 'v', long = "version", action = ArgAction::Version, help = "show version")]
    pub version: Option<bool>,
}

impl Opt {
    pub fn into_config(self) -> Config {
        Config {
            address: self.address,
            count: self.count,
            interval: Duration::from_millis(self.interval),
            timeout: Duration::from_secs(self.timeout),
            size: self.size,
            log_file: self.log_file,
        }
    }
}

fn parse_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|e| format!("{}", e))?;
    if !(config::MIN_SIZE..=config::MAX_SIZE).contains(&size) {
        return Err(format!(
            "must be between {} and {} bytes",
            config::MIN_SIZE,
            config::MAX_SIZE
        ));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config_default() {
        let opt = Opt::try_parse_from(["pingstat"]).unwrap();
        assert_eq!(opt.into_config(), Config::default());
    }

    #[test]
    fn short_flags() {
        let opt = Opt::try_parse_from([
            "pingstat", "-a", "1.1.1.1", "-c", "5", "-i", "200", "-t", "3", "-s", "64", "-l",
            "out.log",
        ])
        .unwrap();
        let config = opt.into_config();

        assert_eq!(config.address, "1.1.1.1");
        assert_eq!(config.count, 5);
        assert_eq!(config.interval, Duration::from_millis(200));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.size, 64);
        assert_eq!(config.log_file, PathBuf::from("out.log"));
    }

    #[test]
    fn rejects_zero_count_and_timeout() {
        assert!(Opt::try_parse_from(["pingstat", "-c", "0"]).is_err());
        assert!(Opt::try_parse_from(["pingstat", "-t", "0"]).is_err());
        assert!(Opt::try_parse_from(["pingstat", "-c", "65536"]).is_err());
    }

    #[test]
    fn rejects_payload_without_room_for_timestamp() {
        assert!(Opt::try_parse_from(["pingstat", "-s", "8"]).is_err());
        assert!(Opt::try_parse_from(["pingstat", "-s", "16"]).is_ok());
    }

    #[test]
    fn rejects_payload_larger_than_a_datagram() {
        let opt = Opt::try_parse_from(["pingstat", "-s", "65507"]).unwrap();
        assert_eq!(opt.size, config::MAX_SIZE);
        assert!(Opt::try_parse_from(["pingstat", "-s", "65508"]).is_err());
        assert!(Opt::try_parse_from(["pingstat", "-s", "100000"]).is_err());
    }

    #[test]
    fn help_and_version_short_circuit() {
        let help = Opt::try_parse_from(["pingstat", "-h"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);

        let version = Opt::try_parse_from(["pingstat", "-v"]).unwrap_err();
        assert_eq!(version.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}

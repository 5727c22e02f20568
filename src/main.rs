use anyhow::{Context, Result};
use clap::Parser;
use log::debug;

use pingstat::cli::Opt;
use pingstat::sink::{FileSink, LogSink};
use pingstat::{logger, ping, privilege, CancelToken, IcmpProbe, Monitor};

fn main() -> Result<(), anyhow::Error> {
    logger::init();

    let opt = Opt::parse();
    let config = opt.into_config();

    let user = privilege::require_root().context("refusing to start")?;
    let addr = ping::resolve(&config.address)
        .with_context(|| format!("Error creating pinger for {}", config.address))?;
    debug!("running as {}, target {} resolves to {}", user.name, config.address, addr);

    let file = FileSink::create(&config.log_file).with_context(|| {
        format!("Failed to open log file {}", config.log_file.display())
    })?;

    let mut monitor = Monitor::new(config, IcmpProbe::new())
        .with_sink(file)
        .with_sink(LogSink);
    monitor.announce();

    // nothing cancels the token, the process runs until it is killed
    monitor.run(&CancelToken::new());

    Ok(())
}

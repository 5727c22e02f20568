use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn, Level};

use crate::config::Config;
use crate::error::ProbeError;
use crate::sink::Sink;
use crate::stat::RunStatistics;

/// Probe performs one measurement run against the configured target.
pub trait Probe {
    fn run(&mut self, config: &Config) -> Result<RunStatistics, ProbeError>;
}

impl<F> Probe for F
where
    F: FnMut(&Config) -> Result<RunStatistics, ProbeError>,
{
    fn run(&mut self, config: &Config) -> Result<RunStatistics, ProbeError> {
        self(config)
    }
}

/// CancelToken stops [`Monitor::run`] between two iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The result of one iteration.
#[derive(Debug)]
pub enum Outcome {
    /// The run succeeded and its line went to every sink.
    Reported(RunStatistics),
    /// The run failed, only the diagnostic sinks heard about it.
    Failed(ProbeError),
}

/// Monitor is the measurement loop: run the probe, log the statistics, repeat.
pub struct Monitor<P> {
    config: Config,
    probe: P,
    sinks: Vec<Box<dyn Sink>>,
}

impl<P: Probe> Monitor<P> {
    pub fn new(config: Config, probe: P) -> Self {
        Monitor {
            config,
            probe,
            sinks: Vec::new(),
        }
    }

    /// Add a sink. Lines are written to sinks in the order they were added.
    pub fn with_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Echo the configuration to every sink.
    pub fn announce(&mut self) -> usize {
        let line = self.config.to_string();
        self.emit(Level::Info, &line)
    }

    /// Run the probe once and report the result.
    pub fn run_once(&mut self) -> Outcome {
        match self.probe.run(&self.config) {
            Ok(stats) => {
                if stats.duplicates > 0 {
                    debug!("{} duplicate replies", stats.duplicates);
                }
                let line = stats.to_string();
                self.emit(Level::Info, &line);
                Outcome::Reported(stats)
            }
            Err(e) => {
                let line = format!("Error running pinger: {}", e);
                self.emit(Level::Error, &line);
                Outcome::Failed(e)
            }
        }
    }

    /// Run until `cancel` is set. Returns the number of iterations done.
    pub fn run(&mut self, cancel: &CancelToken) -> u64 {
        let mut iterations = 0;
        while !cancel.is_cancelled() {
            self.run_once();
            iterations += 1;
        }
        iterations
    }

    /// Write one line to every sink accepting `level`. Returns the number of writes.
    fn emit(&mut self, level: Level, line: &str) -> usize {
        let mut writes = 0;
        for sink in self.sinks.iter_mut().filter(|s| s.accepts(level)) {
            match sink.write_line(level, line) {
                Ok(()) => writes += 1,
                Err(e) => warn!("failed to write to {}: {}", sink.name(), e),
            }
        }
        writes
    }
}

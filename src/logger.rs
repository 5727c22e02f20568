use std::io::Write;

use chrono::Local;

use crate::sink::TIMESTAMP_FORMAT;

/// Initialize the process log stream (stderr), `info` unless `RUST_LOG` says otherwise.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            )
        })
        .init();
}

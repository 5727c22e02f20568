use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;

use chrono::Local;
use log::Level;

/// Timestamp prefix shared by both sinks, e.g. `2024/01/31 13:04:05`.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Sink is an append-only destination for formatted lines.
pub trait Sink {
    /// Short name used when reporting write failures.
    fn name(&self) -> &str;

    /// Whether lines of `level` go to this sink.
    fn accepts(&self, _level: Level) -> bool {
        true
    }

    /// Append one line. The line carries no trailing newline.
    fn write_line(&mut self, level: Level, line: &str) -> io::Result<()>;
}

/// LogSink forwards lines to the process log stream through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn write_line(&mut self, level: Level, line: &str) -> io::Result<()> {
        log::log!(level, "{}", line);
        Ok(())
    }
}

/// WriterSink writes timestamped lines to any writer.
/// Only `Info` lines are taken, diagnostics stay on the process log stream.
pub struct WriterSink<W: Write> {
    name: String,
    writer: W,
}

/// The dedicated log file.
pub type FileSink = WriterSink<LineWriter<File>>;

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        Ok(WriterSink::new(
            path.display().to_string(),
            LineWriter::new(file),
        ))
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        WriterSink {
            name: name.into(),
            writer,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, level: Level) -> bool {
        level == Level::Info
    }

    fn write_line(&mut self, _level: Level, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "{} {}",
            Local::now().format(TIMESTAMP_FORMAT),
            line
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Length of `2024/01/31 13:04:05 `.
    const PREFIX_LEN: usize = 20;

    #[test]
    fn writer_sink_prefixes_timestamp() {
        let mut sink = WriterSink::new("mem", Vec::new());
        sink.write_line(Level::Info, "Sent: 100").unwrap();

        let out = String::from_utf8(sink.get_ref().clone()).unwrap();
        assert!(out.ends_with(" Sent: 100\n"));
        assert_eq!(out.len(), PREFIX_LEN + "Sent: 100\n".len());
        assert!(chrono::NaiveDateTime::parse_from_str(&out[..PREFIX_LEN - 1], TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn writer_sink_only_takes_info() {
        let sink = WriterSink::new("mem", Vec::new());
        assert!(sink.accepts(Level::Info));
        assert!(!sink.accepts(Level::Error));
        assert!(!sink.accepts(Level::Warn));
        assert!(LogSink.accepts(Level::Error));
        assert!(LogSink.accepts(Level::Debug));
    }

    #[test]
    fn file_sink_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping_stats.log");
        fs::write(&path, "old content\n").unwrap();

        {
            let mut sink = FileSink::create(&path).unwrap();
            sink.write_line(Level::Info, "first").unwrap();
            // LineWriter hands the line to the file as soon as it ends
            let content = fs::read_to_string(&path).unwrap();
            assert!(content.ends_with(" first\n"));
        }

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("old content"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn file_sink_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("ping_stats.log");
        assert!(FileSink::create(path).is_err());
    }
}

//! Correlated log writer
//!
//! One record per consumed line, in arrival order, no header. A correlated
//! record is the line followed by the four readings, comma separated, so the
//! last four comma-separated tokens of such a record are always the readings
//! even when the line itself contains commas.
//!
//! Every record is flushed before `write` returns.

use crate::measurement::MeasurementBundle;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// The line verbatim
    Raw(String),
    /// The line plus the readings polled for it
    Correlated {
        /// Decoded line
        line: String,
        /// Readings
        bundle: MeasurementBundle,
    },
}

impl LogRecord {
    /// Build the record for a line and its optional bundle.
    pub fn new(line: &str, bundle: Option<&MeasurementBundle>) -> Self {
        match bundle {
            Some(bundle) => LogRecord::Correlated {
                line: line.to_string(),
                bundle: bundle.clone(),
            },
            None => LogRecord::Raw(line.to_string()),
        }
    }

    /// Whether the record carries readings.
    pub fn is_correlated(&self) -> bool {
        matches!(self, LogRecord::Correlated { .. })
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Raw(line) => f.write_str(line),
            LogRecord::Correlated { line, bundle } => write!(f, "{},{}", line, bundle),
        }
    }
}

/// Appends records to any writer, flushing each one.
pub struct CorrelatedLogWriter<W: Write> {
    writer: W,
    path: Option<PathBuf>,
    records: u64,
    correlated: u64,
}

impl CorrelatedLogWriter<File> {
    /// Create (or truncate) the log file, creating parent directories.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        tracing::info!(path = %path.display(), "Log file created");
        Ok(Self {
            path: Some(path.to_path_buf()),
            ..Self::new(file)
        })
    }
}

impl<W: Write> CorrelatedLogWriter<W> {
    /// Wrap an already open writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            path: None,
            records: 0,
            correlated: 0,
        }
    }

    /// Append one record for `line` and flush.
    pub fn write(&mut self, line: &str, bundle: Option<&MeasurementBundle>) -> io::Result<()> {
        self.write_record(&LogRecord::new(line, bundle))
    }

    /// Append a prepared record and flush.
    pub fn write_record(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(self.writer, "{}", record)?;
        self.writer.flush()?;
        self.records += 1;
        if record.is_correlated() {
            self.correlated += 1;
        }
        Ok(())
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Correlated records written so far.
    pub fn correlated(&self) -> u64 {
        self.correlated
    }

    /// File backing the writer, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Reading;
    use tempfile::tempdir;

    fn bundle() -> MeasurementBundle {
        MeasurementBundle {
            meter_voltage: Reading::Value("3.3".into()),
            meter_current: Reading::Value("0.01".into()),
            load_current: Reading::Unavailable,
            load_power: Reading::Value("2.0".into()),
        }
    }

    #[test]
    fn raw_and_correlated_records() {
        let mut writer = CorrelatedLogWriter::new(Vec::new());
        writer.write("boot, v1.2", None).unwrap();
        writer.write("0.10,0.5", Some(&bundle())).unwrap();

        assert_eq!(writer.records(), 2);
        assert_eq!(writer.correlated(), 1);
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text, "boot, v1.2\n0.10,0.5,3.3,0.01,-1,2.0\n");
    }

    #[test]
    fn readings_are_the_last_four_tokens() {
        let record = LogRecord::new("a,b,c", Some(&bundle())).to_string();
        let tokens: Vec<&str> = record.rsplitn(5, ',').collect();
        assert_eq!(tokens[..4], ["2.0", "-1", "0.01", "3.3"]);
        assert_eq!(tokens[4], "a,b,c");
    }

    #[test]
    fn file_is_readable_after_each_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/log/serial_log.txt");
        let mut writer = CorrelatedLogWriter::create(&path).unwrap();

        writer.write("first", None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");
        writer.write("second", Some(&bundle())).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "first\nsecond,3.3,0.01,-1,2.0\n"
        );
        assert_eq!(writer.path(), Some(path.as_path()));
    }

    #[test]
    fn create_truncates_previous_session() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serial_log.txt");
        std::fs::write(&path, "stale\n").unwrap();

        let mut writer = CorrelatedLogWriter::create(&path).unwrap();
        writer.write("fresh", None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }
}

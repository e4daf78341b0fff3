//! Processor thread: timestamps, highlights, prints and logs lines

use crate::filter::{Color, FilterSet, RESET};
use crate::serial::reader::LineRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use colored::Colorize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// `HH:MM:SS.mmm`
pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format("%H:%M:%S%.3f").to_string()
}

/// Append-only plain text log of received lines
pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one `[timestamp] line` entry and flush it to disk
    pub fn write_entry(&mut self, timestamp: &str, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{}] {}", timestamp, line)?;
        self.writer.flush()
    }

    /// Flush and close the file
    pub fn close(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Formats each line for the terminal and the log
pub struct Processor {
    filters: FilterSet,
    log: Option<LogSink>,
    out: Box<dyn Write + Send>,
    processed: usize,
}

impl Processor {
    /// Processor printing to stdout
    pub fn new(filters: FilterSet, log: Option<LogSink>) -> Self {
        Self::with_output(filters, log, Box::new(io::stdout()))
    }

    pub fn with_output(
        filters: FilterSet,
        log: Option<LogSink>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            filters,
            log,
            out,
            processed: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Whether received lines are still being written to a log file
    pub fn is_logging(&self) -> bool {
        self.log.is_some()
    }

    /// Print a line with its timestamp and append the raw text to the log.
    ///
    /// A failed log write is reported once and logging is switched off.
    pub fn process(&mut self, record: &LineRecord) {
        let timestamp = format_timestamp(&record.received);
        let decorated = self.filters.apply(&record.text);

        if let Err(e) = writeln!(
            self.out,
            "{}[{}]{} {}",
            Color::Dim.code(),
            timestamp,
            RESET,
            decorated
        ) {
            log::warn!("Failed to write to terminal: {}", e);
        }

        if let Some(ref mut sink) = self.log {
            if let Err(e) = sink.write_entry(&timestamp, &record.text) {
                eprintln!(
                    "{} Failed to write log file {}: {} (logging disabled)",
                    "[ERROR]".red().bold(),
                    sink.path().display(),
                    e
                );
                self.log = None;
            }
        }

        self.processed += 1;
    }

    /// Flush the terminal and close the log, returning the log path
    pub fn finish(mut self) -> Option<PathBuf> {
        let _ = self.out.flush();
        let sink = self.log.take()?;
        match sink.close() {
            Ok(path) => Some(path),
            Err(e) => {
                eprintln!("{} Failed to flush log file: {}", "[ERROR]".red().bold(), e);
                None
            }
        }
    }
}

/// Consume lines until `running` clears or the reader hangs up.
///
/// Once `running` clears, keeps writing lines until the reader drops its
/// sender, so every line the reader handed over is printed and logged.
/// The reader exits within one poll of the flag clearing.
pub fn run_processor(
    mut processor: Processor,
    lines: Receiver<LineRecord>,
    running: Arc<AtomicBool>,
    queue_wait: Duration,
) -> Processor {
    while running.load(Ordering::SeqCst) {
        match lines.recv_timeout(queue_wait) {
            Ok(record) => processor.process(&record),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for record in lines.iter() {
        processor.process(&record);
    }

    log::debug!(
        "Processor thread exiting after {} lines (log file {})",
        processor.processed(),
        if processor.is_logging() { "open" } else { "off" }
    );
    processor
}

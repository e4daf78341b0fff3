//! Reader thread: drains the serial transport and splits it into lines
//!
//! Bytes are accumulated across polls; only terminated lines leave the
//! buffer. A partial line waits, however long, for its `\n`.

use crate::error::MonitorResult;
use crate::serial::port::{lock_transport, SharedTransport};
use chrono::{DateTime, Local};
use colored::Colorize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A decoded, terminator-stripped line and the moment it arrived
#[derive(Debug, Clone)]
pub struct LineRecord {
    pub text: String,
    pub received: DateTime<Local>,
}

impl LineRecord {
    pub fn new(text: String) -> Self {
        Self {
            text,
            received: Local::now(),
        }
    }
}

/// Accumulates raw bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every non-empty line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let decoded = String::from_utf8_lossy(&raw[..pos]);
            let line = decoded.strip_suffix('\r').unwrap_or(&*decoded);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Bytes received after the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

/// Poll the transport until `running` clears or the transport fails.
///
/// A transport error clears `running` so the rest of the session winds down.
pub fn run_reader(
    transport: SharedTransport,
    lines: Sender<LineRecord>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) -> MonitorResult<()> {
    let result = read_loop(&transport, &lines, &running, poll_interval);

    if let Err(ref e) = result {
        eprintln!("{} Serial read error: {}", "[ERROR]".red().bold(), e);
        running.store(false, Ordering::SeqCst);
    }
    log::debug!("Reader thread exiting");
    result
}

fn read_loop(
    transport: &SharedTransport,
    lines: &Sender<LineRecord>,
    running: &AtomicBool,
    poll_interval: Duration,
) -> MonitorResult<()> {
    let mut buffer = LineBuffer::new();
    let mut chunk = Vec::new();

    while running.load(Ordering::SeqCst) {
        let received = {
            let mut port = lock_transport(transport)?;
            let available = port.bytes_available()?;
            if available > 0 {
                chunk.resize(available, 0);
                match port.read_chunk(&mut chunk) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
                    Err(e) => return Err(e.into()),
                }
            } else {
                0
            }
        };

        for line in buffer.push(&chunk[..received]) {
            if lines.send(LineRecord::new(line)).is_err() {
                log::debug!("Line queue closed, stopping reader");
                return Ok(());
            }
        }

        thread::sleep(poll_interval);
    }

    if !buffer.pending().is_empty() {
        log::debug!("Discarding {} bytes of unterminated input", buffer.pending().len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::serial::port::tests::MockTransport;
    use crate::serial::port::Transport;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn push_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut buffer = LineBuffer::new();
        chunks.iter().flat_map(|c| buffer.push(c)).collect()
    }

    #[test]
    fn test_split_on_newline() {
        assert_eq!(push_all(&[b"one\ntwo\n"]), vec!["one", "two"]);
    }

    #[test]
    fn test_chunking_does_not_change_lines() {
        let stream: &[u8] = b"boot ok\r\n[INFO] ready\nsensor=42\r\n\nlast\n";
        let whole = push_all(&[stream]);

        for split in 1..stream.len() {
            let (a, b) = stream.split_at(split);
            assert_eq!(push_all(&[a, b]), whole, "split at {}", split);
        }

        let bytewise: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(push_all(&bytewise), whole);
        assert_eq!(whole, vec!["boot ok", "[INFO] ready", "sensor=42", "last"]);
    }

    #[test]
    fn test_partial_line_held_back() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"no terminator yet").is_empty());
        assert_eq!(buffer.pending(), b"no terminator yet");
        assert_eq!(buffer.push(b" - done\n"), vec!["no terminator yet - done"]);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_empty_lines_dropped() {
        assert_eq!(push_all(&[b"\n\r\n\na\n\r\n"]), vec!["a"]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let lines = push_all(&[b"temp \xff\xfe ok\n"]);
        assert_eq!(lines, vec!["temp \u{fffd}\u{fffd} ok"]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let text = "température\n".as_bytes();
        let lines = push_all(&[&text[..3], &text[3..]]);
        assert_eq!(lines, vec!["température"]);
    }

    #[test]
    fn test_reader_thread_forwards_lines() {
        let mock = MockTransport::with_chunks(&[b"INFO: bo", b"ot\n\nERROR: fail\npartial"]);
        let transport: SharedTransport = Arc::new(Mutex::new(Box::new(mock) as Box<dyn Transport>));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();

        let handle = {
            let running = Arc::clone(&running);
            thread::spawn(move || run_reader(transport, tx, running, Duration::from_millis(1)))
        };

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.text, "INFO: boot");
        assert_eq!(second.text, "ERROR: fail");

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_read_error_stops_session() {
        let mock = MockTransport {
            fail_reads: true,
            ..Default::default()
        };
        let transport: SharedTransport = Arc::new(Mutex::new(Box::new(mock) as Box<dyn Transport>));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, _rx) = mpsc::channel();

        let result = run_reader(transport, tx, Arc::clone(&running), Duration::from_millis(1));
        assert!(matches!(result, Err(MonitorError::Transport(_))));
        assert!(!running.load(Ordering::SeqCst));
    }
}

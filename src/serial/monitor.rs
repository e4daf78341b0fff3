//! Monitoring session: connection, reader and processor threads
//!
//! A session moves `Idle -> Connecting -> Monitoring -> Stopping -> Idle`.
//! The reader and processor share nothing but the line queue and the
//! `running` flag; clearing the flag (Ctrl+C, a transport error, or
//! [`Session::stop`]) lets both threads exit on their next poll.

use crate::error::{MonitorError, MonitorResult};
use crate::filter::FilterSet;
use crate::serial::port::{send_line, PortConfig, SerialConnection, WeakTransport};
use crate::serial::processor::{run_processor, LogSink, Processor};
use crate::serial::reader::run_reader;
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Delay between transport polls in the reader
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the processor blocks on the queue before rechecking `running`
pub const QUEUE_WAIT: Duration = Duration::from_millis(100);

/// Configuration for a monitoring session
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Port configuration
    pub port_config: PortConfig,
    /// Log file path (None disables logging)
    pub log_file: Option<PathBuf>,
    /// Lines written to the device once monitoring starts
    pub send_on_start: Vec<String>,
    /// Forward stdin lines to the device
    pub interactive: bool,
    pub poll_interval: Duration,
    pub queue_wait: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port_config: PortConfig::default(),
            log_file: None,
            send_on_start: Vec::new(),
            interactive: false,
            poll_interval: POLL_INTERVAL,
            queue_wait: QUEUE_WAIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Monitoring,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Monitoring => write!(f, "monitoring"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// One connect -> monitor -> disconnect cycle
pub struct Session {
    config: MonitorConfig,
    filters: FilterSet,
    state: SessionState,
    running: Arc<AtomicBool>,
    connection: Option<SerialConnection>,
    reader: Option<JoinHandle<MonitorResult<()>>>,
    processor: Option<JoinHandle<Processor>>,
    output: Option<Box<dyn Write + Send>>,
}

impl Session {
    pub fn new(config: MonitorConfig, filters: FilterSet) -> Self {
        Self {
            config,
            filters,
            state: SessionState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            connection: None,
            reader: None,
            processor: None,
            output: None,
        }
    }

    /// Send processed lines somewhere other than stdout
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get a clone of the running flag for signal handling
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// True while monitoring and the reader has not died
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Monitoring
            && self.running.load(Ordering::SeqCst)
            && self.connection.as_ref().map_or(false, SerialConnection::is_open)
            && self.reader.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Open the configured port and start monitoring it
    pub fn start(&mut self) -> MonitorResult<()> {
        if self.state != SessionState::Idle {
            log::warn!("Session already {}", self.state);
            return Ok(());
        }

        self.state = SessionState::Connecting;
        let port = &self.config.port_config;
        log::debug!("Connecting to {}", port.port_path);

        match SerialConnection::open(port.clone()) {
            Ok(connection) => {
                println!(
                    "{} Connected to {} at {} baud",
                    "[OK]".green().bold(),
                    port.port_path.white().bold(),
                    port.baud_rate
                );
                self.begin(connection);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Start the reader and processor threads on an open connection
    pub fn begin(&mut self, connection: SerialConnection) {
        let transport = match connection.transport() {
            Some(t) => t,
            None => {
                log::warn!("Refusing to monitor a closed connection");
                self.state = SessionState::Idle;
                return;
            }
        };

        let log = self.open_log();
        let processor = match self.output.take() {
            Some(out) => Processor::with_output(self.filters.clone(), log, out),
            None => Processor::new(self.filters.clone(), log),
        };

        let (tx, rx) = mpsc::channel();
        self.running.store(true, Ordering::SeqCst);

        self.reader = Some({
            let running = Arc::clone(&self.running);
            let poll = self.config.poll_interval;
            thread::spawn(move || run_reader(transport, tx, running, poll))
        });
        self.processor = Some({
            let running = Arc::clone(&self.running);
            let wait = self.config.queue_wait;
            thread::spawn(move || run_processor(processor, rx, running, wait))
        });

        self.connection = Some(connection);
        self.state = SessionState::Monitoring;
        log::debug!("Session monitoring");
    }

    fn open_log(&self) -> Option<LogSink> {
        let path = self.config.log_file.as_ref()?;
        match LogSink::open(path) {
            Ok(sink) => {
                println!(
                    "{} Logging to: {}",
                    "[LOG]".cyan().bold(),
                    path.display().to_string().white()
                );
                Some(sink)
            }
            Err(e) => {
                eprintln!(
                    "{} {:#} (continuing without a log file)",
                    "[ERROR]".red().bold(),
                    e
                );
                None
            }
        }
    }

    /// Write a line to the device and echo it
    pub fn send(&self, text: &str) -> MonitorResult<()> {
        let connection = self.connection.as_ref().ok_or(MonitorError::NotConnected)?;
        connection.send(text)?;
        echo_sent(text);
        Ok(())
    }

    /// Send a line, reporting rather than returning a failure
    pub fn send_reporting(&self, text: &str) {
        if let Err(e) = self.send(text) {
            eprintln!("{} Send failed: {}", "[ERROR]".red().bold(), e);
        }
    }

    /// Weak transport handle for an input thread
    fn input_handle(&self) -> Option<WeakTransport> {
        self.connection.as_ref().and_then(|c| c.weak_transport())
    }

    /// Block the calling thread until the session is interrupted or the reader fails
    pub fn wait(&self) {
        while self.is_active() {
            thread::sleep(QUEUE_WAIT);
        }
    }

    /// Stop both threads, close the port and the log. No-op when idle.
    pub fn stop(&mut self) -> Option<PathBuf> {
        if self.state == SessionState::Idle {
            return None;
        }

        self.state = SessionState::Stopping;
        self.running.store(false, Ordering::SeqCst);

        if let Some(reader) = self.reader.take() {
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Reader ended with error: {}", e),
                Err(_) => log::error!("Reader thread panicked"),
            }
        }

        let mut saved = None;
        let mut lines = 0;
        if let Some(processor) = self.processor.take() {
            match processor.join() {
                Ok(processor) => {
                    lines = processor.processed();
                    saved = processor.finish();
                }
                Err(_) => log::error!("Processor thread panicked"),
            }
        }

        if let Some(mut connection) = self.connection.take() {
            if connection.disconnect() {
                println!(
                    "{} Disconnected from {}",
                    "[*]".cyan().bold(),
                    connection.config().port_path.white()
                );
            }
        }

        self.print_summary(lines, saved.as_ref());
        self.state = SessionState::Idle;
        saved
    }

    fn print_summary(&self, lines: usize, saved: Option<&PathBuf>) {
        println!("{}", "--- Monitor Summary ---".cyan().bold());
        println!("Total lines: {}", lines);
        if let Some(path) = saved {
            println!(
                "{} Log saved to: {}",
                "[OK]".green().bold(),
                path.display().to_string().white()
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Idle {
            self.stop();
        }
    }
}

fn echo_sent(text: &str) {
    println!("{} {}", "[TX]".blue().bold(), text.blue());
}

/// Send one line through a handle that may outlive the connection
fn forward_line(transport: &WeakTransport, line: &str) -> MonitorResult<()> {
    let transport = transport.upgrade().ok_or(MonitorError::NotConnected)?;
    send_line(&transport, line)
}

/// Forward lines typed on stdin to the device until stdin closes or the session ends
fn spawn_input_forwarder(transport: WeakTransport, running: Arc<AtomicBool>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };
            match forward_line(&transport, &line) {
                Ok(()) => echo_sent(&line),
                Err(MonitorError::NotConnected) => break,
                Err(e) => eprintln!("{} Send failed: {}", "[ERROR]".red().bold(), e),
            }
        }
        log::debug!("Input forwarder exiting");
    });
}

/// Run a full session with Ctrl+C handling
pub fn run_monitor(config: MonitorConfig, filters: FilterSet) -> Result<()> {
    let mut session = Session::new(config.clone(), filters);

    let running = session.running_flag();
    ctrlc::set_handler(move || {
        println!("\n{}", "Stopping monitor...".yellow());
        running.store(false, Ordering::SeqCst);
    })
    .with_context(|| "Failed to set Ctrl+C handler")?;

    if let Err(e) = session.start() {
        eprintln!("{} {}", "[ERROR]".red().bold(), e);
        return Ok(());
    }

    println!("{}", "Monitoring... press Ctrl+C to stop".green());
    println!("{}", "=".repeat(60).dimmed());

    for text in &config.send_on_start {
        session.send_reporting(text);
    }

    if config.interactive {
        if let Some(transport) = session.input_handle() {
            spawn_input_forwarder(transport, session.running_flag());
        }
    }

    session.wait();
    session.stop();
    log::debug!("Session {}", session.state());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Color;
    use crate::serial::port::tests::MockTransport;
    use crate::serial::processor::tests::SharedOutput;
    use std::time::Instant;
    use tempfile::tempdir;

    fn test_config(log_file: Option<PathBuf>) -> MonitorConfig {
        MonitorConfig {
            port_config: PortConfig::new("mock"),
            log_file,
            poll_interval: Duration::from_millis(1),
            queue_wait: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Monitoring.to_string(), "monitoring");
    }

    #[test]
    fn test_connect_failure_leaves_session_idle() {
        let mut config = test_config(None);
        config.port_config = PortConfig::new("/dev/does-not-exist-serial-monitor");
        let mut session = Session::new(config, FilterSet::with_defaults());

        let err = session.start().unwrap_err();
        assert!(matches!(err, MonitorError::Connect { .. }));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_active());
        assert_eq!(session.stop(), None);
    }

    #[test]
    fn test_full_session_logs_lines() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("run.txt");
        let out = SharedOutput::default();

        let mut filters = FilterSet::with_defaults();
        filters.add("boot", Color::Purple).unwrap();

        let mut session = Session::new(test_config(Some(log_path.clone())), filters)
            .with_output(Box::new(out.clone()));
        let mock = MockTransport::with_chunks(&[b"INFO: boot\n\n", b"ERROR: fail\n"]);
        session.begin(SerialConnection::from_transport(PortConfig::new("mock"), Box::new(mock)));
        assert_eq!(session.state(), SessionState::Monitoring);
        assert!(session.is_active());

        wait_for(|| out.contents().contains("fail"));
        assert_eq!(session.stop(), Some(log_path.clone()));
        assert_eq!(session.state(), SessionState::Idle);

        let printed = out.contents();
        assert!(printed.contains("\x1b[95mboot\x1b[0m"));

        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(logged.lines().count(), 2);
        assert!(logged.lines().all(|l| l.starts_with('[')));
        assert!(!logged.contains('\x1b'));
    }

    #[test]
    fn test_read_error_ends_session() {
        let mock = MockTransport {
            fail_reads: true,
            ..Default::default()
        };
        let mut session = Session::new(test_config(None), FilterSet::new())
            .with_output(Box::new(SharedOutput::default()));
        session.begin(SerialConnection::from_transport(PortConfig::new("mock"), Box::new(mock)));

        wait_for(|| !session.is_active());
        session.wait();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_send_path() {
        let mock = MockTransport::default();
        let written = Arc::clone(&mock.written);
        let mut session = Session::new(test_config(None), FilterSet::new())
            .with_output(Box::new(SharedOutput::default()));

        assert!(matches!(session.send("early"), Err(MonitorError::NotConnected)));

        session.begin(SerialConnection::from_transport(PortConfig::new("mock"), Box::new(mock)));
        session.send("reboot").unwrap();
        assert_eq!(written.lock().unwrap().as_slice(), b"reboot\n");
        session.stop();
    }

    #[test]
    fn test_send_failure_keeps_session() {
        let mock = MockTransport {
            fail_writes: true,
            ..Default::default()
        };
        let mut session = Session::new(test_config(None), FilterSet::new())
            .with_output(Box::new(SharedOutput::default()));
        session.begin(SerialConnection::from_transport(PortConfig::new("mock"), Box::new(mock)));

        assert!(matches!(session.send("x"), Err(MonitorError::Transport(_))));
        session.send_reporting("y");
        assert_eq!(session.state(), SessionState::Monitoring);
        assert!(session.is_active());
        session.stop();
    }

    #[test]
    fn test_unopenable_log_keeps_monitoring() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("missing-dir").join("run.txt");
        let out = SharedOutput::default();

        let config = test_config(Some(log_path.clone()));
        let mut session =
            Session::new(config, FilterSet::with_defaults()).with_output(Box::new(out.clone()));
        let mock = MockTransport::with_chunks(&[b"INFO: hi\n"]);
        session.begin(SerialConnection::from_transport(PortConfig::new("mock"), Box::new(mock)));
        assert_eq!(session.state(), SessionState::Monitoring);
        assert!(session.is_active());

        wait_for(|| out.contents().contains("\x1b[92mINFO:\x1b[0m hi"));
        assert_eq!(session.stop(), None);
        assert!(!log_path.exists());
    }

    #[test]
    fn test_input_handle_released_on_stop() {
        let mock = MockTransport::default();
        let written = Arc::clone(&mock.written);
        let mut session = Session::new(test_config(None), FilterSet::new())
            .with_output(Box::new(SharedOutput::default()));
        session.begin(SerialConnection::from_transport(PortConfig::new("mock"), Box::new(mock)));

        let handle = session.input_handle().unwrap();
        forward_line(&handle, "before-stop").unwrap();

        session.stop();
        assert!(handle.upgrade().is_none());
        assert!(session.input_handle().is_none());
        assert!(matches!(
            forward_line(&handle, "after-stop"),
            Err(MonitorError::NotConnected)
        ));
        assert_eq!(written.lock().unwrap().as_slice(), b"before-stop\n");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut session = Session::new(test_config(None), FilterSet::new())
            .with_output(Box::new(SharedOutput::default()));
        session.begin(SerialConnection::from_transport(
            PortConfig::new("mock"),
            Box::new(MockTransport::default()),
        ));
        session.stop();
        assert_eq!(session.stop(), None);
        assert_eq!(session.state(), SessionState::Idle);
    }
}

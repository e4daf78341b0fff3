//! Serial Monitor
//!
//! Reads newline-delimited text from a serial device, timestamps each line,
//! highlights lines matching regex filters and mirrors everything to a log
//! file.
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! serial-monitor --list
//!
//! # Pick a port interactively, 115200 baud, auto-named log file
//! serial-monitor
//!
//! # Monitor a port with an extra highlight filter
//! serial-monitor -p /dev/ttyUSB0 -b 921600 -f 'temp=\d+'
//!
//! # Type lines to send them to the device
//! serial-monitor -p /dev/ttyACM0 --interactive
//! ```

mod config;
mod error;
mod filter;
mod serial;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use config::Settings;
use filter::{Color, FilterSet};
use serial::port::{list_ports, print_ports, select_port, DEFAULT_BAUD, DEFAULT_TIMEOUT};
use serial::{MonitorConfig, PortConfig};

/// Serial Monitor
///
/// Timestamped, highlighted serial console with log capture
#[derive(Parser, Debug)]
#[command(name = "serial-monitor")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Timestamped serial line monitor with regex highlighting and log capture")]
struct Cli {
    /// Serial port path (e.g., /dev/ttyUSB0, COM3). Prompts for a choice if omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate [default: 115200]
    #[arg(short, long)]
    baudrate: Option<u32>,

    /// Log file path [default: serial_log_<date>_<time>.txt]
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Do not write a log file
    #[arg(long, conflicts_with = "log")]
    no_log: bool,

    /// Extra highlight filter (regex), may be repeated
    #[arg(short, long = "filter")]
    filter: Vec<String>,

    /// List available serial ports and exit
    #[arg(long)]
    list: bool,

    /// Read timeout in seconds [default: 1.0]
    #[arg(short, long, value_parser = config::parse_timeout)]
    timeout: Option<Duration>,

    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send a line to the device once connected, may be repeated
    #[arg(long = "send", value_name = "TEXT")]
    send: Vec<String>,

    /// Forward lines typed on stdin to the device
    #[arg(short, long)]
    interactive: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if cli.list {
        print_ports(&list_ports());
        return Ok(());
    }

    let settings = match cli.config {
        Some(ref path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let port_path = match cli.port.clone() {
        Some(p) => p,
        None => match prompt_for_port() {
            Some(p) => p,
            None => return Ok(()),
        },
    };

    let config = build_config(&cli, &settings, &port_path)?;
    if !config.port_config.is_common_baud_rate() {
        log::warn!("Non-standard baud rate {}", config.port_config.baud_rate);
    }

    let filters = build_filters(&settings, &cli.filter);
    log::debug!("{} highlight filters registered", filters.len());
    serial::monitor::run_monitor(config, filters)
}

/// Show the numbered port list and read a choice from stdin
fn prompt_for_port() -> Option<String> {
    let ports = list_ports();
    print_ports(&ports);
    if ports.is_empty() {
        return None;
    }

    print!("\nSelect a port (1-{}): ", ports.len());
    let _ = io::stdout().flush();

    match select_port(&ports, io::stdin().lock()) {
        Ok(path) => Some(path),
        Err(e) => {
            println!("{} {} - cancelled", "[ERROR]".red().bold(), e);
            None
        }
    }
}

/// Merge command line flags over the settings file over built-in defaults
fn build_config(cli: &Cli, settings: &Settings, port_path: &str) -> Result<MonitorConfig> {
    let baud_rate = cli.baudrate.or(settings.baudrate).unwrap_or(DEFAULT_BAUD);
    let timeout = match (cli.timeout, settings.timeout) {
        (Some(t), _) => t,
        (None, Some(secs)) => config::timeout_from_secs(secs)?,
        (None, None) => DEFAULT_TIMEOUT,
    };

    let log_file = if cli.no_log {
        None
    } else {
        Some(
            cli.log
                .clone()
                .or_else(|| settings.log.clone())
                .unwrap_or_else(config::default_log_filename),
        )
    };

    Ok(MonitorConfig {
        port_config: PortConfig::new(port_path)
            .with_baud_rate(baud_rate)
            .with_timeout(timeout),
        log_file,
        send_on_start: cli.send.clone(),
        interactive: cli.interactive,
        ..Default::default()
    })
}

/// Built-in filters, then settings file filters, then `-f` filters.
///
/// Invalid patterns are reported and skipped.
fn build_filters(settings: &Settings, extra: &[String]) -> FilterSet {
    let mut filters = FilterSet::with_defaults();

    let from_settings = settings.filters.iter().map(|f| {
        let color = f.color.as_deref().map(Color::from_name).unwrap_or(Color::Yellow);
        (f.pattern.as_str(), color)
    });
    let from_cli = extra.iter().map(|p| (p.as_str(), Color::Yellow));

    for (pattern, color) in from_settings.chain(from_cli) {
        match filters.add(pattern, color) {
            Ok(filter) => println!(
                "{} Filter added: {} ({})",
                "[OK]".green().bold(),
                filter.pattern(),
                filter.color()
            ),
            Err(e) => eprintln!("{} {}", "[ERROR]".red().bold(), e),
        }
    }

    filters
}

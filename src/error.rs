//! Error types for the serial monitor
//!
//! Most of the tool propagates `anyhow::Result`; the variants here are the
//! failures callers need to tell apart (a bad filter is skipped, a failed
//! connect aborts the session, a bad port choice cancels startup).

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to open serial port {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port is not connected")]
    NotConnected,

    #[error("Serial transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("No serial ports found")]
    NoPorts,
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

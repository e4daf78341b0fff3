//! Optional TOML settings file
//!
//! ```toml
//! baudrate = 921600
//! timeout = 0.5
//! log = "bench.txt"
//!
//! [[filter]]
//! pattern = "BOOT"
//! color = "purple"
//! ```
//!
//! Every key is optional. Command line flags take precedence. File filters
//! are registered after the built-in ones and before any `-f` filters.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A highlight filter declared in the settings file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FilterEntry {
    pub pattern: String,
    /// Colour name; unknown or missing names highlight in yellow
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub baudrate: Option<u32>,
    /// Read timeout in seconds
    pub timeout: Option<f64>,
    pub log: Option<PathBuf>,
    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterEntry>,
}

impl Settings {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid settings file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }
}

/// Convert a timeout in seconds into a `Duration`, rejecting negative or non-finite values
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow::anyhow!("Invalid timeout: {} seconds", secs))
}

/// clap value parser for `--timeout`
pub fn parse_timeout(arg: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = arg
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", arg))?;
    timeout_from_secs(secs).map_err(|e| e.to_string())
}

/// `serial_log_YYYYmmdd_HHMMSS.txt` for the current local time
pub fn default_log_filename() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("serial_log_{}.txt", stamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use tempfile::tempdir;

    #[test]
    fn test_empty_settings() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_full_settings() {
        let settings = Settings::parse(
            r#"
            baudrate = 921600
            timeout = 0.25
            log = "bench.txt"

            [[filter]]
            pattern = "BOOT"
            color = "purple"

            [[filter]]
            pattern = "temp=\\d+"
            "#,
        )
        .unwrap();

        assert_eq!(settings.baudrate, Some(921600));
        assert_eq!(settings.timeout, Some(0.25));
        assert_eq!(settings.log, Some(PathBuf::from("bench.txt")));
        assert_eq!(settings.filters.len(), 2);
        assert_eq!(settings.filters[0].color.as_deref(), Some("purple"));
        assert_eq!(settings.filters[1].pattern, "temp=\\d+");
        assert_eq!(settings.filters[1].color, None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::parse("baud = 9600").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "baudrate = 57600\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.baudrate, Some(57600));
        assert!(Settings::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("1.0").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_timeout("0.5").unwrap(), Duration::from_millis(500));
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_default_log_filename() {
        let name = default_log_filename();
        let re = Regex::new(r"^serial_log_\d{8}_\d{6}\.txt$").unwrap();
        assert!(re.is_match(name.to_str().unwrap()));
    }
}

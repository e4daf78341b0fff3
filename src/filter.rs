//! Regex highlight filters
//!
//! A filter pairs a regular expression with a terminal colour. Filters are
//! applied in registration order; each one wraps every match in the line
//! with its colour code and a reset. Later filters scan the already
//! decorated text, so overlapping patterns can nest their escape codes.

use crate::error::{MonitorError, MonitorResult};
use regex::{Captures, Regex};
use std::fmt;
use std::str::FromStr;

/// ANSI reset sequence
pub const RESET: &str = "\x1b[0m";

/// Filters registered for every session, in this order
pub const DEFAULT_FILTERS: &[(&str, Color)] = &[
    (r"\[ERROR\]|\[ERRO\]|ERROR:", Color::Red),
    (r"\[WARN\]|\[WARNING\]|WARN:", Color::Yellow),
    (r"\[INFO\]|INFO:", Color::Green),
    (r"\[DEBUG\]|DEBUG:", Color::Cyan),
    (r"=== .* ===", Color::Bold),
];

/// Fixed highlight palette
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Reset,
    Red,
    Green,
    Yellow,
    Blue,
    Purple,
    Cyan,
    White,
    Bold,
    Dim,
}

impl Color {
    /// Escape sequence that starts this colour
    pub fn code(self) -> &'static str {
        match self {
            Color::Reset => RESET,
            Color::Red => "\x1b[91m",
            Color::Green => "\x1b[92m",
            Color::Yellow => "\x1b[93m",
            Color::Blue => "\x1b[94m",
            Color::Purple => "\x1b[95m",
            Color::Cyan => "\x1b[96m",
            Color::White => "\x1b[97m",
            Color::Bold => "\x1b[1m",
            Color::Dim => "\x1b[2m",
        }
    }

    /// Look up a colour by name; unknown names fall back to yellow
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(Color::Yellow)
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reset" => Ok(Color::Reset),
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "yellow" => Ok(Color::Yellow),
            "blue" => Ok(Color::Blue),
            "purple" => Ok(Color::Purple),
            "cyan" => Ok(Color::Cyan),
            "white" => Ok(Color::White),
            "bold" => Ok(Color::Bold),
            "dim" => Ok(Color::Dim),
            other => Err(format!("unknown colour '{}'", other)),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Color::Reset => "reset",
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Purple => "purple",
            Color::Cyan => "cyan",
            Color::White => "white",
            Color::Bold => "bold",
            Color::Dim => "dim",
        };
        f.write_str(name)
    }
}

/// A compiled highlight filter
#[derive(Debug, Clone)]
pub struct Filter {
    regex: Regex,
    color: Color,
    pattern: String,
}

impl Filter {
    /// Compile a filter
    pub fn new(pattern: &str, color: Color) -> MonitorResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| MonitorError::InvalidFilter {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            regex,
            color,
            pattern: pattern.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Wrap every non-overlapping match in `text` with this filter's colour
    pub fn highlight(&self, text: &str) -> String {
        let start = self.color.code();
        self.regex
            .replace_all(text, |caps: &Captures| format!("{}{}{}", start, &caps[0], RESET))
            .into_owned()
    }
}

/// Ordered collection of highlight filters
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// Create an empty filter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter set holding the built-in log level filters
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        for (pattern, color) in DEFAULT_FILTERS {
            // The built-in patterns are known to compile
            if let Ok(filter) = Filter::new(pattern, *color) {
                set.filters.push(filter);
            }
        }
        set
    }

    /// Compile and append a filter. An invalid pattern leaves the set unchanged.
    pub fn add(&mut self, pattern: &str, color: Color) -> MonitorResult<&Filter> {
        let filter = Filter::new(pattern, color)?;
        log::debug!("Registered filter {:?} ({})", pattern, color);
        self.filters.push(filter);
        Ok(&self.filters[self.filters.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    /// Decorate a raw line with every filter that matches it
    pub fn apply(&self, line: &str) -> String {
        let mut decorated = line.to_string();
        for filter in &self.filters {
            if filter.is_match(line) {
                decorated = filter.highlight(&decorated);
            }
        }
        decorated
    }
}

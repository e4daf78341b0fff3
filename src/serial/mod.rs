//! Serial transport and monitoring pipeline
//!
//! - `port`: port discovery, 8N1 connections and the send path
//! - `reader`: drains the port and splits it into lines
//! - `processor`: timestamps, highlights, prints and logs lines
//! - `monitor`: the session tying the two threads together

pub mod monitor;
pub mod port;
pub mod processor;
pub mod reader;

pub use monitor::MonitorConfig;
pub use port::PortConfig;

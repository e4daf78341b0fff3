//! Serial port configuration, discovery and connection management

use crate::error::{MonitorError, MonitorResult};
use colored::Colorize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, StopBits};
use std::io::{self, BufRead, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Standard baud rates; anything else is allowed but logged
pub const COMMON_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1000000,
];

pub const DEFAULT_BAUD: u32 = 115200;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for serial port connection
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB0, COM3)
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (always 8)
    pub data_bits: DataBits,
    /// Parity (always none)
    pub parity: Parity,
    /// Stop bits (always 1)
    pub stop_bits: StopBits,
    /// Flow control (transport default: none)
    pub flow_control: FlowControl,
    /// Read timeout
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::new(),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PortConfig {
    /// Create a new 8N1 configuration for the given device
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_common_baud_rate(&self) -> bool {
        COMMON_BAUD_RATES.contains(&self.baud_rate)
    }
}

/// Byte-level access to an open serial line
///
/// Implemented for real ports; tests substitute an in-memory device.
pub trait Transport: Send {
    /// Number of bytes waiting in the input buffer
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` and flush it to the device
    fn write_data(&mut self, data: &[u8]) -> io::Result<()>;
}

impl Transport for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let pending = self.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending as usize)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut **self, buf)
    }

    fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut **self, data)?;
        Write::flush(&mut **self)
    }
}

/// Transport handle shared between the reader thread and the send path
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Non-owning transport handle; does not keep the device open
pub type WeakTransport = Weak<Mutex<Box<dyn Transport>>>;

/// Lock a shared transport, surfacing poisoning as a transport error
pub fn lock_transport(
    transport: &SharedTransport,
) -> MonitorResult<MutexGuard<'_, Box<dyn Transport>>> {
    transport.lock().map_err(|_| {
        MonitorError::Transport(io::Error::new(
            io::ErrorKind::Other,
            "serial transport lock poisoned",
        ))
    })
}

/// Write `text` plus a line terminator through a shared transport
pub fn send_line(transport: &SharedTransport, text: &str) -> MonitorResult<()> {
    let mut payload = String::with_capacity(text.len() + 1);
    payload.push_str(text);
    payload.push('\n');

    lock_transport(transport)?.write_data(payload.as_bytes())?;
    Ok(())
}

/// An open (or closed) serial connection
pub struct SerialConnection {
    transport: Option<SharedTransport>,
    config: PortConfig,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration
    pub fn open(config: PortConfig) -> MonitorResult<Self> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()
            .map_err(|source| MonitorError::Connect {
                path: config.port_path.clone(),
                source,
            })?;

        log::info!(
            "Opened {} at {} baud (timeout {:?})",
            config.port_path,
            config.baud_rate,
            config.timeout
        );

        Ok(Self::from_transport(config, Box::new(port)))
    }

    /// Wrap an already open transport
    pub fn from_transport(config: PortConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Some(Arc::new(Mutex::new(transport))),
            config,
        }
    }

    /// Get the port configuration
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Handle for the reader thread
    pub fn transport(&self) -> Option<SharedTransport> {
        self.transport.clone()
    }

    /// Handle for senders that must not outlive the connection
    pub fn weak_transport(&self) -> Option<WeakTransport> {
        self.transport.as_ref().map(Arc::downgrade)
    }

    /// Append a newline to `text` and write it to the device
    pub fn send(&self, text: &str) -> MonitorResult<()> {
        let transport = self.transport.as_ref().ok_or(MonitorError::NotConnected)?;
        send_line(transport, text)?;
        log::debug!("Sent {} bytes to {}", text.len() + 1, self.config.port_path);
        Ok(())
    }

    /// Drop this connection's handle. Returns false if it was already closed.
    ///
    /// The device is closed when the last strong handle goes, so callers join
    /// the reader thread first. Weak handles do not keep it open.
    pub fn disconnect(&mut self) -> bool {
        match self.transport.take() {
            Some(_) => {
                log::info!("Closed {}", self.config.port_path);
                true
            }
            None => false,
        }
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, description, manufacturer) = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                (PortType::UsbSerial, usb.product, usb.manufacturer)
            }
            serialport::SerialPortType::PciPort => (PortType::PciSerial, None, None),
            serialport::SerialPortType::BluetoothPort => (PortType::Bluetooth, None, None),
            serialport::SerialPortType::Unknown => (PortType::Unknown, None, None),
        };

        Self {
            path: info.port_name,
            port_type,
            description: description.filter(|d| !d.is_empty() && d != "n/a"),
            manufacturer: manufacturer.filter(|m| !m.is_empty()),
        }
    }
}

impl PortInfo {
    /// One-line label: `path - description (manufacturer)`
    pub fn label(&self) -> String {
        let mut label = self.path.clone();
        if let Some(ref desc) = self.description {
            label.push_str(&format!(" - {}", desc));
        }
        if let Some(ref mfg) = self.manufacturer {
            label.push_str(&format!(" ({})", mfg));
        }
        label
    }
}

/// List all available serial ports. Enumeration failures yield an empty list.
pub fn list_ports() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            log::warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Print a numbered list of ports
pub fn print_ports(ports: &[PortInfo]) {
    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect a USB-to-serial adapter");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return;
    }

    println!("{}", "Available Serial Ports:".cyan().bold());
    for (i, port) in ports.iter().enumerate() {
        println!("  {}. {}", i + 1, port.label());
        log::debug!("{} is a {} port", port.path, port.port_type);
    }
}

/// Resolve a 1-based choice read from `input` to a port path
pub fn select_port<R: BufRead>(ports: &[PortInfo], mut input: R) -> MonitorResult<String> {
    if ports.is_empty() {
        return Err(MonitorError::NoPorts);
    }

    let mut choice = String::new();
    let read = input.read_line(&mut choice)?;
    if read == 0 {
        return Err(MonitorError::InvalidSelection("no input".to_string()));
    }

    let choice = choice.trim();
    let index: usize = choice
        .parse()
        .map_err(|_| MonitorError::InvalidSelection(choice.to_string()))?;

    index
        .checked_sub(1)
        .and_then(|i| ports.get(i))
        .map(|p| p.path.clone())
        .ok_or_else(|| MonitorError::InvalidSelection(choice.to_string()))
}

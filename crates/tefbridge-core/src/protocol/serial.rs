//! Serial port handling
//!
//! Real `serialport`-backed transport plus port enumeration. Inbound bytes
//! are pumped to the registered sink by a reader thread owned by the
//! transport.

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits};
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::transport::{ByteSink, SerialTransport};
use super::TefError;
use crate::config::SerialSettings;

/// Poll interval of the reader thread; also the port read timeout
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone, serde::Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                (Some(usb.vid), Some(usb.pid), usb.manufacturer, usb.product)
            }
            _ => (None, None, None, None),
        };
        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

/// Ordering key for device names: stem first, then the trailing number read
/// as a number, so `ttyUSB2` comes before `ttyUSB10`. No device class is
/// preferred over another; datáfono USB adapters show up as either ttyUSB
/// (FTDI/Prolific cables) or ttyACM (CDC terminals) and neither is more
/// likely to be the right one.
fn port_order(name: &str) -> (String, usize) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let suffix_digits = basename
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let (stem, number) = basename.split_at(basename.len() - suffix_digits);
    (stem.to_string(), number.parse().unwrap_or(0))
}

/// List available serial ports in a stable order.
///
/// The COM3 fallback in [`SerialPortTransport::open`] walks this list, so
/// the order decides which adapter a misconfigured POS reaches first.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();

    // USB-serial adapters occasionally hide from the enumeration API on
    // Linux; scan the conventional device names as a safety net.
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("ttyUSB") || name.starts_with("ttyACM") {
                    let full = format!("/dev/{name}");
                    if !ports.iter().any(|p| p.name == full) {
                        ports.push(PortInfo {
                            name: full,
                            vid: None,
                            pid: None,
                            manufacturer: None,
                            product: None,
                        });
                    }
                }
            }
        }
    }

    ports.sort_by_key(|p| port_order(&p.name));
    ports
}

/// Candidate device names for a configured port.
///
/// The name is tried as configured; a literal `"COM3"` on a POSIX host is a
/// Windows default that leaked out of the POS configuration, so the
/// enumerated tty ports are tried behind it.
fn port_candidates(configured: &str) -> Vec<String> {
    let mut candidates = vec![configured.to_string()];
    if !cfg!(windows) && configured == "COM3" {
        candidates.extend(list_ports().into_iter().map(|p| p.name));
    }
    candidates
}

fn map_data_bits(bits: u8) -> Result<DataBits, TefError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(TefError::TransportError(format!(
            "unsupported data bits: {other}"
        ))),
    }
}

fn map_stop_bits(bits: u8) -> Result<StopBits, TefError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(TefError::TransportError(format!(
            "unsupported stop bits: {other}"
        ))),
    }
}

fn map_parity(parity: &str) -> Result<Parity, TefError> {
    match parity.to_ascii_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        other => Err(TefError::TransportError(format!(
            "unsupported parity: {other}"
        ))),
    }
}

/// Transport over a physical serial device
pub struct SerialPortTransport {
    port: Option<Box<dyn SerialPort>>,
    sink: Option<Arc<dyn ByteSink>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialPortTransport {
    pub fn new() -> Self {
        Self {
            port: None,
            sink: None,
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn open_device(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, TefError> {
        let data_bits = map_data_bits(settings.data_bits)?;
        let stop_bits = map_stop_bits(settings.stop_bits)?;
        let parity = map_parity(&settings.parity)?;

        let mut last_error = None;
        for candidate in port_candidates(&settings.port) {
            match serialport::new(&candidate, settings.baud)
                .data_bits(data_bits)
                .parity(parity)
                .stop_bits(stop_bits)
                .flow_control(FlowControl::None)
                .timeout(READ_TIMEOUT)
                .open()
            {
                Ok(port) => {
                    if candidate != settings.port {
                        log::info!(
                            "configured port {} unavailable, fell back to {}",
                            settings.port,
                            candidate
                        );
                    } else {
                        log::info!("opened serial port {} at {} baud", candidate, settings.baud);
                    }
                    return Ok(port);
                }
                Err(e) => {
                    log::debug!("open {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }
        Err(TefError::TransportError(match last_error {
            Some(e) => e.to_string(),
            None => format!("no serial device for {}", settings.port),
        }))
    }

    fn spawn_reader(
        port: Box<dyn SerialPort>,
        sink: Arc<dyn ByteSink>,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut port = port;
            let mut buffer = [0u8; 512];
            loop {
                if stop.load(Ordering::SeqCst) {
                    return; // local close, reported by the closer
                }
                match port.read(&mut buffer) {
                    Ok(0) => {}
                    Ok(n) => {
                        log::trace!("serial rx {} bytes: {:02x?}", n, &buffer[..n]);
                        sink.on_bytes(&buffer[..n]);
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        log::warn!("serial read error: {}", e);
                        sink.on_error(TefError::TransportError(e.to_string()));
                        return;
                    }
                }
            }
        })
    }
}

impl Default for SerialPortTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for SerialPortTransport {
    fn open(&mut self, settings: &SerialSettings) -> Result<(), TefError> {
        if self.port.is_some() {
            return Err(TefError::TransportError(
                "transport already open".to_string(),
            ));
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| TefError::TransportError("no sink registered".to_string()))?;

        let port = Self::open_device(settings)?;
        let reader_port = port
            .try_clone()
            .map_err(|e| TefError::TransportError(e.to_string()))?;

        self.stop = Arc::new(AtomicBool::new(false));
        self.reader = Some(Self::spawn_reader(
            reader_port,
            sink,
            Arc::clone(&self.stop),
        ));
        self.port = Some(port);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TefError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| TefError::TransportError("transport not open".to_string()))?;
        log::trace!("serial tx {} bytes: {:02x?}", bytes.len(), bytes);
        port.write_all(bytes)
            .map_err(|e| TefError::TransportError(e.to_string()))?;
        // Auto-drain so the terminal sees the frame immediately
        port.flush()
            .map_err(|e| TefError::TransportError(e.to_string()))?;
        Ok(())
    }

    fn close(&mut self) {
        // The reader is detached, not joined: it may be blocked delivering to
        // the sink while the caller holds the transport. It winds down within
        // one poll interval of the stop flag.
        self.stop.store(true, Ordering::SeqCst);
        self.port = None;
        self.reader = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_sink(&mut self, sink: Arc<dyn ByteSink>) {
        self.sink = Some(sink);
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.close();
    }
}

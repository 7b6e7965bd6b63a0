//! Serial port handling
//!
//! Port discovery and the tokio-serial backed [`Transport`].

use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Transport, TransportError, MAX_LINE_LENGTH};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
            ),
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

/// Sort key placing ttyACM* first, then ttyUSB*, then everything else by name.
/// Bluetooth serial links (rfcomm*, tty.*-Port) fall in the last group.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
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

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Split the first complete line off `buf`, dropping the terminator and any CR.
/// A buffer longer than [`MAX_LINE_LENGTH`] without a terminator is returned whole
/// so a chattering device cannot grow it without bound.
pub(crate) fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let end = match buf.iter().position(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None if buf.len() >= MAX_LINE_LENGTH => buf.len(),
        None => return None,
    };
    let raw: Vec<u8> = buf.drain(..end).collect();
    let line = String::from_utf8_lossy(&raw);
    Some(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Serial transport (8N1, no flow control) over tokio-serial
#[derive(Default)]
pub struct SerialTransport {
    stream: Option<SerialStream>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Create a closed transport
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, port_name: &str, baud_rate: u32) -> Result<(), TransportError> {
        self.close();
        let stream = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::PortUnavailable {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(port = port_name, baud_rate, "serial port opened");
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_line(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.write_all(bytes).await.map_err(TransportError::Write)?;
        stream.flush().await.map_err(TransportError::Write)
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(line);
            }
            let n = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                Err(_) => return Err(TransportError::Timeout),
                Ok(Err(e)) => return Err(TransportError::Read(e)),
                Ok(Ok(0)) => {
                    return Err(TransportError::Read(io::Error::from(
                        io::ErrorKind::UnexpectedEof,
                    )))
                }
                Ok(Ok(n)) => n,
            };
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("serial port closed");
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

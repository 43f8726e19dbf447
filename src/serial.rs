//! Serial port plumbing shared by the modular device clients.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`SharedPort`]: Thread-safe shared serial port with buffered reading
//!
//! Anything implementing the async I/O traits can stand in for a port, which is
//! how the mock devices plug in over `tokio::io::duplex`.

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (mock devices and tests)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
///
/// The modular device protocol is line-delimited, so the `BufReader` wrapper
/// provides `read_line()`. Holding the lock spans one full request/response
/// exchange.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a SharedPort from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> Result<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let stream = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| std::io::Error::other(format!("spawn_blocking for port open failed: {}", e)))??;

    Ok(stream)
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards bytes until nothing arrives for the remainder of
/// `timeout_ms`. Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

/// Serial ports worth probing for modular devices.
///
/// Modular devices enumerate as USB CDC/FTDI ports; built-in UARTs, Bluetooth
/// and PCI ports are skipped so discovery does not spray probe bytes at
/// unrelated hardware.
pub fn list_candidate_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    let candidates = ports
        .into_iter()
        .filter(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .collect();
    Ok(candidates)
}

/// Every serial port the OS reports, with a short description.
///
/// Used by `--list-ports` so an operator can see what discovery would skip.
pub fn describe_ports() -> Result<Vec<(String, String)>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let desc = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => format!(
                    "USB {:04x}:{:04x} {} {}",
                    info.vid,
                    info.pid,
                    info.manufacturer.unwrap_or_default(),
                    info.serial_number.unwrap_or_default()
                )
                .trim_end()
                .to_string(),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "unknown".to_string(),
            };
            (p.port_name, desc)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_shared_port_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));

        host.write_all(b"{\"id\":\"stop\"}\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "{\"id\":\"stop\"}");
    }

    #[tokio::test]
    async fn test_drain_discards_stale_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale garbage").await.unwrap();

        let discarded = drain_serial_buffer(&mut device, 20).await;
        assert_eq!(discarded, 13);
    }

    #[tokio::test]
    async fn test_drain_empty_port_times_out_cleanly() {
        let (_host, mut device) = tokio::io::duplex(64);
        let discarded = drain_serial_buffer(&mut device, 10).await;
        assert_eq!(discarded, 0);
    }
}

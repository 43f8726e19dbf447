//! Client for a single modular device.
//!
//! A [`ModularClient`] owns one serial port and performs request/response
//! exchanges using the framing in [`crate::protocol`]. Transport failures are
//! retried with linear backoff; error objects returned by the firmware are
//! surfaced immediately as [`HplcError::Device`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use hplc_interface::client::ModularClient;
//!
//! let client = ModularClient::open("/dev/ttyACM0", 115200, Duration::from_secs(4)).await?;
//! let id = client.device_id().await?;
//! let info = client.call("getGradientInfo", &[]).await?;
//! ```

use crate::error::{HplcError, Result};
use crate::protocol::{self, DeviceId};
use crate::serial::{self, DynSerial, SharedPort};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::instrument;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;
const DRAIN_WINDOW_MS: u64 = 5;

/// Default per-request timeout, matching the firmware's slowest handlers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(4_000);

/// Request/response client for one modular device.
///
/// Cloning is cheap; clones share the port and the cached identity.
#[derive(Clone)]
pub struct ModularClient {
    port: SharedPort,
    port_name: Arc<str>,
    timeout: Duration,
    device_id: Arc<OnceCell<DeviceId>>,
}

impl std::fmt::Debug for ModularClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModularClient")
            .field("port_name", &self.port_name)
            .field("timeout", &self.timeout)
            .field("device_id", &self.device_id.get())
            .finish()
    }
}

impl ModularClient {
    /// Open a serial port and wrap it in a client.
    ///
    /// The device is not contacted until the first call.
    pub async fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let stream = serial::open_serial_async(port_path, baud_rate).await?;
        Ok(Self::from_port(port_path, Box::new(stream), timeout))
    }

    /// Wrap an already open port (real or mock).
    pub fn from_port(port_name: &str, port: DynSerial, timeout: Duration) -> Self {
        Self {
            port: serial::wrap_shared(port),
            port_name: Arc::from(port_name),
            timeout,
            device_id: Arc::new(OnceCell::new()),
        }
    }

    /// Name of the port this client talks to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Identity of the device, queried once and cached.
    pub async fn device_id(&self) -> Result<DeviceId> {
        let id = self
            .device_id
            .get_or_try_init(|| async {
                let value = self.call(protocol::GET_DEVICE_ID, &[]).await?;
                serde_json::from_value::<DeviceId>(value).map_err(|e| {
                    HplcError::Protocol(format!(
                        "{} returned an invalid device id: {}",
                        self.port_name, e
                    ))
                })
            })
            .await?;
        Ok(id.clone())
    }

    /// Invoke `method` with positional `args` and return the raw result.
    ///
    /// `method` may be given in snake_case; it is converted before sending.
    #[instrument(skip(self, args), fields(port = %self.port_name), err)]
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let method = protocol::method_name(method);
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * (attempt as u64));
                tracing::debug!(
                    method = %method,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying modular device request after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.call_once(&method, args).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        method = %method,
                        attempt,
                        error = %e,
                        "Modular device request attempt failed"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            HplcError::Protocol(format!(
                "'{}' failed after {} attempts",
                method, MAX_ATTEMPTS
            ))
        }))
    }

    /// Invoke `method` and deserialize the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: &[Value]) -> Result<T> {
        let value = self.call(method, args).await?;
        serde_json::from_value(value).map_err(|e| {
            HplcError::Protocol(format!(
                "unexpected result type from '{}': {}",
                protocol::method_name(method),
                e
            ))
        })
    }

    /// Read a property by calling its method with no arguments.
    pub async fn property(&self, name: &str) -> Result<Value> {
        self.call(name, &[]).await
    }

    async fn call_once(&self, method: &str, args: &[Value]) -> Result<Value> {
        let request = protocol::encode_request(method, args)?;
        let mut port = self.port.lock().await;

        // Anything already buffered belongs to an abandoned exchange.
        let buffered = port.buffer().len();
        if buffered > 0 {
            tracing::debug!(bytes = buffered, "Discarding buffered bytes before request");
            port.consume(buffered);
        }
        let stale = serial::drain_serial_buffer(port.get_mut(), DRAIN_WINDOW_MS).await;
        if stale > 0 {
            tracing::debug!(bytes = stale, "Flushed stale bytes from port");
        }

        tracing::trace!(request = %String::from_utf8_lossy(&request).trim_end(), "sending");
        port.get_mut().write_all(&request).await?;
        port.get_mut().flush().await?;

        let timeout_ms = self.timeout.as_millis() as u64;
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout_at(deadline, port.read_line(&mut line)).await;
            match read {
                Err(_) => {
                    return Err(HplcError::Timeout {
                        method: method.to_string(),
                        timeout_ms,
                    })
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(0)) => {
                    return Err(HplcError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("{} closed the connection", self.port_name),
                    )))
                }
                Ok(Ok(_)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    tracing::trace!(response = %line.trim_end(), "received");
                    return protocol::decode_response(method, &line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn client_pair() -> (ModularClient, tokio::io::DuplexStream) {
        let (host, device) = tokio::io::duplex(1024);
        let client = ModularClient::from_port("test", Box::new(host), Duration::from_millis(200));
        (client, device)
    }

    #[tokio::test]
    async fn test_call_sends_camel_case_request() {
        let (client, device) = client_pair();
        let responder = tokio::spawn(async move {
            let mut reader = BufReader::new(device);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader
                .get_mut()
                .write_all(b"{\"id\":\"getGradientInfo\",\"result\":{\"percent_b\":12.5}}\n")
                .await
                .unwrap();
            line
        });

        let value = client.call("get_gradient_info", &[]).await.unwrap();
        assert_eq!(value, json!({"percent_b": 12.5}));
        assert_eq!(responder.await.unwrap(), "[\"getGradientInfo\"]\n");
    }

    #[tokio::test]
    async fn test_device_error_is_not_retried() {
        let (client, device) = client_pair();
        let responder = tokio::spawn(async move {
            let mut reader = BufReader::new(device);
            let mut count = 0;
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                count += 1;
                reader
                    .get_mut()
                    .write_all(b"{\"id\":\"getDetectorInfo\",\"error\":{\"message\":\"no detector\"}}\n")
                    .await
                    .unwrap();
                line.clear();
            }
            count
        });

        let err = client.call("get_detector_info", &[]).await.unwrap_err();
        assert!(matches!(err, HplcError::Device { .. }));
        drop(client);
        assert_eq!(responder.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out_after_retries() {
        let (client, _device) = client_pair();
        let err = client.call("getDeviceId", &[]).await.unwrap_err();
        assert!(matches!(err, HplcError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_device_id_is_cached() {
        let (client, device) = client_pair();
        let responder = tokio::spawn(async move {
            let mut reader = BufReader::new(device);
            let mut line = String::new();
            let mut count = 0;
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                count += 1;
                reader
                    .get_mut()
                    .write_all(
                        b"{\"id\":\"getDeviceId\",\"result\":{\"name\":\"hplc_controller\",\"form_factor\":\"3x2\",\"serial_number\":0}}\n",
                    )
                    .await
                    .unwrap();
                line.clear();
            }
            count
        });

        let first = client.device_id().await.unwrap();
        let second = client.device_id().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "hplc_controller");
        drop(client);
        assert_eq!(responder.await.unwrap(), 1);
    }
}

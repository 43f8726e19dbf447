//! Simulated modular devices.
//!
//! A [`MockModularDevice`] answers the wire protocol over an in-memory
//! `tokio::io::duplex` pipe, so the full client stack (framing, timeouts,
//! discovery indexing) runs exactly as it would against a serial port.
//!
//! Used by the `--mock` CLI flag to rehearse a run without hardware, and by
//! the test suite.
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = MockModularDevice::hplc_controller()
//!     .with_property("gradient_duration", json!(30));
//! let log = controller.call_log();
//! let client = controller.spawn_client();
//! ```

use crate::client::ModularClient;
use crate::config::{ExperimentConfig, Settings};
use crate::discovery::ModularClients;
use crate::error::Result;
use crate::protocol::{self, DeviceId};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Shared record of every method a mock device received, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Snapshot of the methods received so far.
    pub async fn calls(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }

    /// How many times `method` (camelCase) was received.
    pub async fn count(&self, method: &str) -> usize {
        self.0.lock().await.iter().filter(|m| *m == method).count()
    }

    async fn push(&self, method: &str) {
        self.0.lock().await.push(method.to_string());
    }
}

/// In-process stand-in for a modular device board.
#[derive(Debug, Clone)]
pub struct MockModularDevice {
    id: DeviceId,
    properties: HashMap<String, Value>,
    detector_attached: bool,
    accept_wavelengths: bool,
    float_wavelengths: bool,
    wavelengths: Vec<u32>,
    gradient_failures: u32,
    unresponsive: HashSet<String>,
    running: bool,
    samples: u64,
    log: CallLog,
}

impl MockModularDevice {
    /// Blank device with the given identity and no properties.
    pub fn new(name: &str) -> Self {
        Self {
            id: DeviceId {
                name: name.to_string(),
                form_factor: "3x2".to_string(),
                serial_number: 0,
            },
            properties: HashMap::new(),
            detector_attached: false,
            accept_wavelengths: true,
            float_wavelengths: false,
            wavelengths: vec![0; 4],
            gradient_failures: 0,
            unresponsive: HashSet::new(),
            running: false,
            samples: 0,
            log: CallLog::default(),
        }
    }

    /// Gradient controller preset with typical gradient properties.
    pub fn hplc_controller() -> Self {
        Self::new("hplc_controller")
            .with_property("gradient_duration", json!(30))
            .with_property("initial_concentration", json!(5))
            .with_property("final_concentration", json!(95))
    }

    /// Detector bridge preset, optionally with a detector attached.
    pub fn ultraviolet_detector_interface(detector_attached: bool) -> Self {
        Self {
            detector_attached,
            ..Self::new("ultraviolet_detector_interface")
        }
    }

    /// Set the serial number reported by `getDeviceId`.
    pub fn with_serial_number(mut self, serial_number: u32) -> Self {
        self.id.serial_number = serial_number;
        self
    }

    /// Set the form factor reported by `getDeviceId`.
    pub fn with_form_factor(mut self, form_factor: &str) -> Self {
        self.id.form_factor = form_factor.to_string();
        self
    }

    /// Add or replace a readable property (snake_case or camelCase name).
    pub fn with_property(mut self, name: &str, value: Value) -> Self {
        self.properties.insert(protocol::method_name(name), value);
        self
    }

    /// Make `setWavelengths` succeed without changing the stored wavelengths.
    pub fn ignoring_wavelength_writes(mut self) -> Self {
        self.accept_wavelengths = false;
        self
    }

    /// Report wavelengths as floats (`254.0`), like some bridge firmware.
    pub fn reporting_float_wavelengths(mut self) -> Self {
        self.float_wavelengths = true;
        self
    }

    /// Answer the first `count` `getGradientInfo` requests with a device error.
    pub fn failing_gradient_info(mut self, count: u32) -> Self {
        self.gradient_failures = count;
        self
    }

    /// Log requests for `method` but never answer them.
    pub fn unresponsive_to(mut self, method: &str) -> Self {
        self.unresponsive.insert(protocol::method_name(method));
        self
    }

    /// Handle to the record of received methods.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Start serving the device on a background task and return a client for it.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn_client(self) -> ModularClient {
        self.spawn_client_with_timeout(Duration::from_millis(500))
    }

    /// Same as [`spawn_client`](Self::spawn_client) with a custom request timeout.
    pub fn spawn_client_with_timeout(self, timeout: Duration) -> ModularClient {
        let (host, device) = tokio::io::duplex(4096);
        let port_name = format!("mock://{}", self.id);
        tokio::spawn(self.serve(device));
        ModularClient::from_port(&port_name, Box::new(host), timeout)
    }

    async fn serve(mut self, stream: tokio::io::DuplexStream) {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if line.trim().is_empty() {
                continue;
            }
            let Some(reply) = self.respond(line.trim()).await else {
                continue;
            };
            let mut bytes = reply.to_string().into_bytes();
            bytes.push(b'\n');
            if reader.get_mut().write_all(&bytes).await.is_err() {
                break;
            }
        }
        tracing::trace!(device = %self.id, "mock device disconnected");
    }

    async fn respond(&mut self, request: &str) -> Option<Value> {
        let frame: Vec<Value> = match serde_json::from_str(request) {
            Ok(frame) => frame,
            Err(e) => return Some(error_reply(Value::Null, "Parse error", &e.to_string(), -32700)),
        };
        let Some(method) = frame.first().and_then(Value::as_str).map(str::to_string) else {
            return Some(error_reply(Value::Null, "Invalid Request", "", -32600));
        };
        self.log.push(&method).await;
        if self.unresponsive.contains(&method) {
            return None;
        }
        let args = &frame[1..];

        let reply = match self.dispatch(&method, args) {
            Ok(value) => json!({ "id": method, "result": value }),
            Err((message, data, code)) => error_reply(json!(method), message, &data, code),
        };
        Some(reply)
    }

    fn dispatch(
        &mut self,
        method: &str,
        args: &[Value],
    ) -> std::result::Result<Value, (&'static str, String, i64)> {
        match method {
            protocol::GET_DEVICE_ID => Ok(json!(self.id)),
            "getGradientInfo" => {
                if self.gradient_failures > 0 {
                    self.gradient_failures -= 1;
                    return Err(("Server error", "gradient pump not ready".to_string(), -32000));
                }
                self.samples += 1;
                Ok(self.gradient_info())
            }
            "stop" => {
                self.running = false;
                Ok(Value::Null)
            }
            "getDetectorInfo" => {
                if self.detector_attached {
                    Ok(json!({ "model": "ECOM Toydad", "channels": self.wavelengths.len() }))
                } else {
                    Err(("Server error", "detector not responding".to_string(), -32000))
                }
            }
            "setWavelengths" => {
                if !self.detector_attached {
                    return Err(("Server error", "detector not responding".to_string(), -32000));
                }
                let requested: Vec<u32> = args
                    .first()
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or(("Invalid params", "expected an array of wavelengths".to_string(), -32602))?;
                if self.accept_wavelengths {
                    self.wavelengths = requested;
                }
                Ok(Value::Null)
            }
            "getWavelengths" => {
                if self.detector_attached && self.float_wavelengths {
                    Ok(json!(self.wavelengths.iter().map(|&w| f64::from(w)).collect::<Vec<_>>()))
                } else if self.detector_attached {
                    Ok(json!(self.wavelengths))
                } else {
                    Err(("Server error", "detector not responding".to_string(), -32000))
                }
            }
            other => match self.properties.get(other) {
                Some(value) if args.is_empty() => Ok(value.clone()),
                Some(_) => Err(("Invalid params", format!("{} takes no parameters", other), -32602)),
                None => Err(("Method not found", other.to_string(), -32601)),
            },
        }
    }

    fn gradient_info(&mut self) -> Value {
        self.running = true;
        let initial = self.number("initialConcentration").unwrap_or(0.0);
        let final_ = self.number("finalConcentration").unwrap_or(100.0);
        let duration = self.number("gradientDuration").unwrap_or(1.0).max(1.0);
        let elapsed = self.samples as f64;
        let fraction = (elapsed / duration).min(1.0);
        let mut info = Map::new();
        info.insert("running".into(), json!(self.running));
        info.insert("elapsed".into(), json!(elapsed));
        info.insert(
            "concentration".into(),
            json!(initial + (final_ - initial) * fraction),
        );
        Value::Object(info)
    }

    fn number(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(Value::as_f64)
    }
}

fn error_reply(id: Value, message: &str, data: &str, code: i64) -> Value {
    json!({ "id": id, "error": { "message": message, "data": data, "code": code } })
}

/// Build a device set whose controller already matches `config`.
///
/// The controller reports every gradient property from the experiment file
/// and the detector bridge has a detector attached, so a run configured from
/// the same file sets up cleanly.
pub async fn mock_clients(settings: &Settings, config: &ExperimentConfig) -> Result<ModularClients> {
    let mut controller = MockModularDevice::new(&settings.controller.name)
        .with_form_factor(&settings.controller.form_factor)
        .with_serial_number(settings.controller.serial_number);
    for (name, value) in config.gradient_properties()? {
        controller = controller.with_property(&name, value);
    }
    let detector = MockModularDevice::ultraviolet_detector_interface(true);
    let detector = MockModularDevice {
        id: DeviceId {
            name: settings.detector.name.clone(),
            form_factor: settings.detector.form_factor.clone(),
            serial_number: settings.detector.serial_number,
        },
        ..detector
    };

    let mut clients = ModularClients::new();
    clients
        .insert(controller.spawn_client_with_timeout(settings.timeout()))
        .await?;
    clients
        .insert(detector.spawn_client_with_timeout(settings.timeout()))
        .await?;
    Ok(clients)
}

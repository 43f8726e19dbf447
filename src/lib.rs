//! # hplc_interface
//!
//! Host-side control of an HPLC (High-Performance Liquid Chromatography) rig
//! assembled from serial "modular devices": a gradient controller and a UV
//! detector bridge.
//!
//! ```rust,ignore
//! use hplc_interface::HplcInterface;
//!
//! let mut dev = HplcInterface::new(); // Might automatically find devices if available
//! dev.start().await?;
//! ```
//!
//! ## Crate Structure
//!
//! - **`config`**: runtime settings (Figment) and the per-run experiment file (YAML).
//! - **`protocol`**: JSON line framing spoken by the modular device firmware.
//! - **`serial`**: async serial port types and helpers.
//! - **`client`**: request/response client for one device, with retries.
//! - **`discovery`**: port scanning and the name/form factor/serial index.
//! - **`devices`**: typed wrappers for the controller and the detector bridge.
//! - **`interface`**: `HplcInterface`, setup, verification and gradient sampling.
//! - **`recorder`**: CSV recording of gradient samples.
//! - **`mock`**: simulated devices for rehearsal and tests.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the `HplcError` type.

pub mod client;
pub mod config;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod interface;
pub mod logging;
pub mod mock;
pub mod protocol;
pub mod recorder;
pub mod serial;

pub use config::{ExperimentConfig, Settings};
pub use error::{HplcError, Result};
pub use interface::{GradientSample, HplcInterface, InterfaceState};

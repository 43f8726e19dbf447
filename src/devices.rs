//! Typed wrappers for the two modular devices in the rig.
//!
//! - [`HplcController`]: runs the solvent gradient (`hplc_controller` firmware)
//! - [`UltravioletDetector`]: bridges the ECOM Toydad UV detector
//!   (`ultraviolet_detector_interface` firmware)
//!
//! Both are thin: the firmware owns the behavior, these types only give the
//! calls names and result types.

use crate::client::ModularClient;
use crate::error::{HplcError, Result};
use serde_json::{json, Value};
use tracing::instrument;

/// Solvent gradient controller.
#[derive(Debug, Clone)]
pub struct HplcController {
    client: ModularClient,
}

impl HplcController {
    /// Wrap a client connected to an `hplc_controller` board.
    pub fn new(client: ModularClient) -> Self {
        Self { client }
    }

    /// Underlying device client.
    pub fn client(&self) -> &ModularClient {
        &self.client
    }

    /// Read a gradient property, e.g. `gradient_duration`.
    pub async fn property(&self, name: &str) -> Result<Value> {
        self.client.property(name).await
    }

    /// Snapshot of the running gradient.
    ///
    /// The firmware decides the shape; it is passed through unchanged.
    #[instrument(skip(self), err)]
    pub async fn gradient_info(&self) -> Result<Value> {
        self.client.call("get_gradient_info", &[]).await
    }

    /// Stop the gradient and pumps.
    #[instrument(skip(self), err)]
    pub async fn stop(&self) -> Result<()> {
        self.client.call("stop", &[]).await?;
        Ok(())
    }
}

/// UV detector bridge.
#[derive(Debug, Clone)]
pub struct UltravioletDetector {
    client: ModularClient,
}

impl UltravioletDetector {
    /// Wrap a client connected to an `ultraviolet_detector_interface` board.
    pub fn new(client: ModularClient) -> Self {
        Self { client }
    }

    /// Underlying device client.
    pub fn client(&self) -> &ModularClient {
        &self.client
    }

    /// Identification of the attached detector.
    ///
    /// The bridge answers with a device error when no detector is attached.
    #[instrument(skip(self), err)]
    pub async fn detector_info(&self) -> Result<Value> {
        self.client.call("get_detector_info", &[]).await
    }

    /// Program the detector channel wavelengths, in nm.
    #[instrument(skip(self), err)]
    pub async fn set_wavelengths(&self, wavelengths: &[u32]) -> Result<()> {
        self.client
            .call("set_wavelengths", &[json!(wavelengths)])
            .await?;
        Ok(())
    }

    /// Wavelengths currently programmed, in nm, as the bridge reports them.
    ///
    /// Left untyped: some firmware builds report whole numbers as floats.
    #[instrument(skip(self), err)]
    pub async fn wavelengths(&self) -> Result<Value> {
        self.client.call("get_wavelengths", &[]).await
    }
}

/// Fit a configured wavelength list to the detector's channel count.
///
/// Extra entries are dropped from the end; a short list is padded by repeating
/// its last entry.
pub fn normalize_wavelengths(wavelengths: &[u32], count: usize) -> Result<Vec<u32>> {
    let last = *wavelengths.last().ok_or_else(|| {
        HplcError::Configuration("detector.wavelengths must contain at least one entry".into())
    })?;
    let mut normalized: Vec<u32> = wavelengths.iter().copied().take(count).collect();
    normalized.resize(count, last);
    Ok(normalized)
}

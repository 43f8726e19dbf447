//! The HPLC rig as a whole.
//!
//! [`HplcInterface`] ties the pieces together: it loads the experiment file,
//! finds the controller and the detector bridge, checks that the controller's
//! gradient matches the experiment, programs the detector wavelengths, and
//! then samples the gradient at a fixed rate until stopped.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──setup()──► Ready ──start()──► Running ──stop()──► Stopped
//!   └───────────start() (runs setup)───────┘        ▲          │
//!                                                   └─start()──┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use hplc_interface::HplcInterface;
//!
//! let mut hplc = HplcInterface::new(); // discovers devices on start()
//! let mut samples = hplc.subscribe();
//! hplc.start().await?;
//! while let Ok(sample) = samples.recv().await {
//!     println!("{}", sample.info);
//! }
//! ```

use crate::config::{ExperimentConfig, Settings};
use crate::devices::{normalize_wavelengths, HplcController, UltravioletDetector};
use crate::discovery::ModularClients;
use crate::error::{HplcError, Result};
use crate::protocol::values_match;
use crate::recorder::SampleRecorder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// One reading of the controller's gradient state.
#[derive(Debug, Clone, Serialize)]
pub struct GradientSample {
    /// Host time the reading completed.
    pub timestamp: DateTime<Utc>,
    /// 1-based count of samples since `start()`.
    pub sequence: u64,
    /// Result of `getGradientInfo`, unchanged.
    pub info: Value,
}

/// Where the interface is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    /// Constructed, nothing contacted yet.
    Idle,
    /// Devices found and configured.
    Ready,
    /// Sampling the gradient.
    Running,
    /// Sampling stopped and the controller told to stop.
    Stopped,
}

struct Sampler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Host-side controller for an HPLC rig of modular devices.
pub struct HplcInterface {
    settings: Settings,
    experiment: Option<ExperimentConfig>,
    injected: Option<ModularClients>,
    controller: Option<HplcController>,
    detector: Option<UltravioletDetector>,
    detector_connected: bool,
    wavelengths: Vec<u32>,
    state: InterfaceState,
    samples: broadcast::Sender<GradientSample>,
    sampler: Option<Sampler>,
}

impl Default for HplcInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HplcInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HplcInterface")
            .field("state", &self.state)
            .field("detector_connected", &self.detector_connected)
            .field("wavelengths", &self.wavelengths)
            .finish_non_exhaustive()
    }
}

impl HplcInterface {
    /// Interface with default settings.
    ///
    /// Devices are discovered automatically when `setup()` or `start()` runs.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Interface with explicit settings.
    pub fn with_settings(settings: Settings) -> Self {
        let (samples, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        Self {
            settings,
            experiment: None,
            injected: None,
            controller: None,
            detector: None,
            detector_connected: false,
            wavelengths: Vec::new(),
            state: InterfaceState::Idle,
            samples,
            sampler: None,
        }
    }

    /// Interface using already connected devices instead of discovery.
    pub fn with_clients(settings: Settings, clients: ModularClients) -> Self {
        let mut interface = Self::with_settings(settings);
        interface.injected = Some(clients);
        interface
    }

    /// Use this experiment configuration instead of reading the file.
    pub fn with_experiment(mut self, experiment: ExperimentConfig) -> Self {
        self.experiment = Some(experiment);
        self
    }

    /// Runtime settings in effect.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InterfaceState {
        self.state
    }

    /// Whether setup has completed.
    pub fn is_setup(&self) -> bool {
        self.state != InterfaceState::Idle
    }

    /// Whether the gradient is being sampled.
    pub fn is_running(&self) -> bool {
        self.state == InterfaceState::Running
    }

    /// Whether a UV detector answered on the detector bridge.
    pub fn detector_connected(&self) -> bool {
        self.detector_connected
    }

    /// Wavelengths after normalization to the detector channel count.
    pub fn wavelengths(&self) -> &[u32] {
        &self.wavelengths
    }

    /// The gradient controller, once set up.
    pub fn controller(&self) -> Option<&HplcController> {
        self.controller.as_ref()
    }

    /// Receive every gradient sample taken after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<GradientSample> {
        self.samples.subscribe()
    }

    /// Load the experiment, connect to the devices and configure them.
    pub async fn setup(&mut self) -> Result<()> {
        let started = Instant::now();
        let experiment = match self.experiment.clone() {
            Some(experiment) => experiment,
            None => ExperimentConfig::load(&self.settings.experiment_config_path())?,
        };
        self.setup_modular_clients().await?;
        self.configure(&experiment).await?;
        self.experiment = Some(experiment);
        self.state = InterfaceState::Ready;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Setup time"
        );
        Ok(())
    }

    async fn setup_modular_clients(&mut self) -> Result<()> {
        // Injected devices stay available so a failed setup can be retried.
        let clients = match &self.injected {
            Some(clients) => clients.clone(),
            None => ModularClients::discover(&self.settings).await?,
        };

        let controller_sel = &self.settings.controller;
        if !clients.contains(&controller_sel.name) {
            return Err(HplcError::DeviceNotConnected(controller_sel.name.clone()));
        }
        let controller = HplcController::new(clients.select(controller_sel)?);
        tracing::info!(device = %controller_sel.name, "connected");

        let detector_sel = &self.settings.detector;
        if !clients.contains(&detector_sel.name) {
            return Err(HplcError::DeviceNotConnected(detector_sel.name.clone()));
        }
        let detector = UltravioletDetector::new(clients.select(detector_sel)?);
        tracing::info!(device = %detector_sel.name, "connected");

        self.detector_connected = match detector.detector_info().await {
            Ok(info) => {
                tracing::info!(detector_info = %info, "UV detector found");
                true
            }
            Err(HplcError::Device { message, .. }) => {
                tracing::warn!(
                    reason = %message,
                    "ECOM Toydad UV detector is not connected to the {}!",
                    detector_sel.name
                );
                false
            }
            Err(e) => return Err(e),
        };

        self.controller = Some(controller);
        self.detector = Some(detector);
        Ok(())
    }

    async fn configure(&mut self, experiment: &ExperimentConfig) -> Result<()> {
        let controller = self.controller.as_ref().ok_or(HplcError::NotSetUp)?;

        for (property, expected) in experiment.gradient_properties()? {
            let actual = controller.property(&property).await?;
            if values_match(&expected, &actual) {
                tracing::info!(property = %property, value = %actual, "gradient property verified");
            } else {
                tracing::error!(
                    property = %property,
                    expected = %expected,
                    actual = %actual,
                    "gradient property mismatch"
                );
                return Err(HplcError::Verification(format!(
                    "Gradient property {} not set properly.",
                    property
                )));
            }
        }

        let wavelengths = normalize_wavelengths(
            &experiment.detector.wavelengths,
            self.settings.wavelength_count,
        )?;

        if self.detector_connected {
            let detector = self.detector.as_ref().ok_or(HplcError::NotSetUp)?;
            detector.set_wavelengths(&wavelengths).await?;
            let programmed = detector.wavelengths().await?;
            if !values_match(&serde_json::json!(wavelengths), &programmed) {
                tracing::error!(
                    requested = ?wavelengths,
                    programmed = %programmed,
                    "detector wavelength mismatch"
                );
                return Err(HplcError::Verification(
                    "Detector wavelengths not set properly.".to_string(),
                ));
            }
            tracing::info!(wavelengths = %programmed, "detector wavelengths set");
        }

        self.wavelengths = wavelengths;
        Ok(())
    }

    /// Begin sampling the gradient, running setup first if needed.
    ///
    /// The first sample is taken one period after this call. Calling `start()`
    /// while already running does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if !self.is_setup() {
            self.setup().await?;
        }
        if self.is_running() {
            return Ok(());
        }

        let controller = self.controller.clone().ok_or(HplcError::NotSetUp)?;
        let recorder = match &self.settings.record_path {
            Some(path) => Some(SampleRecorder::create(path)?),
            None => None,
        };
        let period = self.settings.sample_period();
        let samples = self.samples.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(sample_loop(controller, period, samples, recorder, shutdown_rx));

        self.sampler = Some(Sampler { shutdown, handle });
        self.state = InterfaceState::Running;
        tracing::info!(period_ms = period.as_millis() as u64, "Sampling started");
        Ok(())
    }

    /// Stop sampling and tell the controller to stop.
    ///
    /// Safe to call more than once and before setup; only the controller
    /// command can fail.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(sampler) = self.sampler.take() {
            let _ = sampler.shutdown.send(true);
            if let Err(e) = sampler.handle.await {
                tracing::warn!(error = %e, "Sampling task ended abnormally");
            }
        }

        if !self.is_setup() {
            return Ok(());
        }

        self.state = InterfaceState::Stopped;
        let controller = self.controller.as_ref().ok_or(HplcError::NotSetUp)?;
        controller.stop().await?;
        tracing::info!("HPLC controller stopped");
        Ok(())
    }
}

impl Drop for HplcInterface {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.handle.abort();
        }
    }
}

async fn sample_loop(
    controller: HplcController,
    period: std::time::Duration,
    samples: broadcast::Sender<GradientSample>,
    mut recorder: Option<SampleRecorder>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        // A slow or silent controller must not hold up stop().
        let reading = tokio::select! {
            _ = shutdown.changed() => break,
            reading = controller.gradient_info() => reading,
        };
        let info = match reading {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read gradient info");
                continue;
            }
        };

        sequence += 1;
        let sample = GradientSample {
            timestamp: Utc::now(),
            sequence,
            info,
        };
        tracing::info!(sequence, gradient_info = %sample.info, "gradient sample");

        if let Some(rec) = recorder.as_mut() {
            if let Err(e) = rec.record(&sample) {
                tracing::error!(error = %e, path = %rec.path().display(), "Recording failed, disabling recorder");
                recorder = None;
            }
        }

        // No subscribers is fine; the sample was still logged.
        let _ = samples.send(sample);
    }

    tracing::debug!(samples = sequence, "Sampling loop exited");
}

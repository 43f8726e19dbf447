//! Configuration for the HPLC interface.
//!
//! Two files are involved:
//!
//! - **Runtime settings** ([`Settings`]): where to look for devices, how fast to
//!   sample, timeouts, logging. Layered with Figment: library defaults, then an
//!   optional TOML file, then `HPLC_` environment variables.
//! - **Experiment configuration** ([`ExperimentConfig`]): the `config.yaml` an
//!   operator edits per run, holding the gradient settings the controller must
//!   already have and the detector wavelengths to program.
//!
//! ## Experiment file
//!
//! ```yaml
//! gradient:
//!   gradient_duration: 30
//!   initial_concentration: 5
//!   final_concentration: 95
//! detector:
//!   wavelengths: [254, 280]
//! ```

use crate::error::{HplcError, Result};
use figment::{providers::Serialized, Figment, Provider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the experiment file looked up under `base_path`.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Which modular device fills a role in the rig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelector {
    /// Firmware name reported by `getDeviceId`.
    pub name: String,
    /// Board form factor.
    pub form_factor: String,
    /// Serial number of the board.
    pub serial_number: u32,
}

impl DeviceSelector {
    /// Selector for a 3x2 board with serial number 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            form_factor: "3x2".to_string(),
            serial_number: 0,
        }
    }
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging verbosity: "error", "warn", "info", "debug", "trace".
    pub log_level: String,

    /// Debug mode: raises logging to debug and reports setup timing.
    pub debug: bool,

    /// Directory holding the experiment file. `~` is expanded.
    ///
    /// Default: `~/Desktop`.
    pub base_path: PathBuf,

    /// Experiment file name inside `base_path`.
    pub config_filename: String,

    /// Gradient sampling rate in Hz. Valid range: (0, 100]. Default: 1.
    pub sample_frequency_hz: f64,

    /// Per-request device timeout in milliseconds. Valid range: 100-60000.
    /// Default: 4000.
    pub timeout_ms: u64,

    /// Serial baud rate used when opening ports.
    pub baud_rate: u32,

    /// Number of detector channels; configured wavelengths are padded or
    /// truncated to this length. Default: 4.
    pub wavelength_count: usize,

    /// Explicit ports to probe. Empty means enumerate USB serial ports.
    pub ports: Vec<String>,

    /// Device running the solvent gradient.
    pub controller: DeviceSelector,

    /// Device bridging the UV detector.
    pub detector: DeviceSelector,

    /// Optional CSV file receiving every gradient sample.
    pub record_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
            base_path: PathBuf::from("~/Desktop"),
            config_filename: CONFIG_FILENAME.to_string(),
            sample_frequency_hz: 1.0,
            timeout_ms: 4_000,
            baud_rate: 115_200,
            wavelength_count: 4,
            ports: Vec::new(),
            controller: DeviceSelector::new("hplc_controller"),
            detector: DeviceSelector::new("ultraviolet_detector_interface"),
            record_path: None,
        }
    }
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> std::result::Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error>
    {
        Serialized::defaults(Settings::default()).data()
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, and the environment.
    ///
    /// # Environment Variables
    ///
    /// Fields can be overridden with the `HPLC_` prefix; nested fields use
    /// double underscores:
    ///
    /// - `HPLC_SAMPLE_FREQUENCY_HZ=2` → sets `sample_frequency_hz`
    /// - `HPLC_CONTROLLER__SERIAL_NUMBER=1` → sets `controller.serial_number`
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        use figment::providers::{Env, Format, Toml};

        let mut figment = Figment::from(Settings::default());

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                return Err(HplcError::Configuration(format!(
                    "settings file not found: {}",
                    path.display()
                )));
            }
        }

        figment = figment.merge(Env::prefixed("HPLC_").split("__"));

        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check that values are within supported ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_frequency_hz > 0.0 && self.sample_frequency_hz <= 100.0) {
            return Err(HplcError::Configuration(format!(
                "sample_frequency_hz = {} is out of range (0, 100]",
                self.sample_frequency_hz
            )));
        }
        if !(100..=60_000).contains(&self.timeout_ms) {
            return Err(HplcError::Configuration(format!(
                "timeout_ms = {} is out of range (100ms - 60000ms)",
                self.timeout_ms
            )));
        }
        if self.wavelength_count == 0 {
            return Err(HplcError::Configuration(
                "wavelength_count must be at least 1".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(HplcError::Configuration(
                "baud_rate must be positive".to_string(),
            ));
        }
        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(HplcError::Configuration(format!(
                "log_level '{}' is not one of {:?}",
                self.log_level, LEVELS
            )));
        }
        Ok(())
    }

    /// Per-request device timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interval between gradient samples.
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_frequency_hz)
    }

    /// Full path of the experiment file, with `~` expanded.
    pub fn experiment_config_path(&self) -> PathBuf {
        expand_home(&self.base_path).join(&self.config_filename)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Detector section of the experiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Wavelengths in nm, one per detector channel.
    pub wavelengths: Vec<u32>,
}

/// Per-run experiment configuration (`config.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Gradient property name → value the controller must report.
    ///
    /// Entries are checked in file order.
    pub gradient: serde_yaml::Mapping,

    /// Detector settings.
    pub detector: DetectorConfig,
}

impl ExperimentConfig {
    /// Read and parse an experiment file.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading experiment configuration");
        let text = std::fs::read_to_string(path).map_err(|e| {
            HplcError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot read {}: {}", path.display(), e),
            ))
        })?;
        let config = Self::from_yaml_str(&text)?;
        tracing::info!(path = %path.display(), "experiment configuration loaded successfully");
        Ok(config)
    }

    /// Parse an experiment configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Gradient properties in file order, with values as JSON.
    pub fn gradient_properties(&self) -> Result<Vec<(String, Value)>> {
        self.gradient
            .iter()
            .map(|(key, value)| {
                let name = key.as_str().ok_or_else(|| {
                    HplcError::Configuration(format!(
                        "gradient property names must be strings, got {:?}",
                        key
                    ))
                })?;
                let json = serde_json::to_value(value).map_err(|e| {
                    HplcError::Configuration(format!(
                        "gradient property {} has an unsupported value: {}",
                        name, e
                    ))
                })?;
                Ok((name.to_string(), json))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const EXPERIMENT: &str = r#"
gradient:
  gradient_duration: 30
  initial_concentration: 5
  final_concentration: 95.5
detector:
  wavelengths: [254, 280]
"#;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sample_period(), Duration::from_secs(1));
        assert_eq!(settings.timeout(), Duration::from_millis(4_000));
        assert_eq!(settings.wavelength_count, 4);
        assert_eq!(settings.controller, DeviceSelector::new("hplc_controller"));
        assert_eq!(settings.detector.name, "ultraviolet_detector_interface");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
sample_frequency_hz = 2.0
ports = ["/dev/ttyACM0", "/dev/ttyACM1"]

[controller]
name = "hplc_controller"
form_factor = "5x3"
serial_number = 2
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.sample_period(), Duration::from_millis(500));
        assert_eq!(settings.ports.len(), 2);
        assert_eq!(settings.controller.form_factor, "5x3");
        assert_eq!(settings.controller.serial_number, 2);
        // Untouched sections keep defaults
        assert_eq!(settings.detector, DeviceSelector::new("ultraviolet_detector_interface"));
    }

    #[test]
    fn test_example_files_parse() {
        let settings = Settings::load(Some(Path::new("config/hplc.example.toml"))).unwrap();
        assert_eq!(settings.timeout_ms, 4_000);
        assert_eq!(settings.controller, DeviceSelector::new("hplc_controller"));

        let text = std::fs::read_to_string("config/config.example.yaml").unwrap();
        let experiment = ExperimentConfig::from_yaml_str(&text).unwrap();
        assert_eq!(experiment.gradient_properties().unwrap().len(), 3);
    }

    #[test]
    fn test_missing_settings_file_is_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/hplc.toml"))).unwrap_err();
        assert!(matches!(err, HplcError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let settings = Settings {
            sample_frequency_hz: 0.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            timeout_ms: 50,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            wavelength_count: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            log_level: "verbose".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_experiment_path_expands_home() {
        let settings = Settings::default();
        let path = settings.experiment_config_path();
        assert!(path.ends_with("Desktop/config.yaml"));
        if dirs::home_dir().is_some() {
            assert!(!path.starts_with("~"));
        }

        let settings = Settings {
            base_path: PathBuf::from("/data/runs"),
            config_filename: "run1.yaml".into(),
            ..Settings::default()
        };
        assert_eq!(
            settings.experiment_config_path(),
            PathBuf::from("/data/runs/run1.yaml")
        );
    }

    #[test]
    fn test_parse_experiment_preserves_order() {
        let config = ExperimentConfig::from_yaml_str(EXPERIMENT).unwrap();
        let props = config.gradient_properties().unwrap();
        let names: Vec<_> = props.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["gradient_duration", "initial_concentration", "final_concentration"]
        );
        assert_eq!(props[2].1, json!(95.5));
        assert_eq!(config.detector.wavelengths, vec![254, 280]);
    }

    #[test]
    fn test_experiment_missing_detector_is_parse_error() {
        let err = ExperimentConfig::from_yaml_str("gradient: {}\n").unwrap_err();
        assert!(matches!(err, HplcError::ConfigParse(_)));
    }

    #[test]
    fn test_load_missing_experiment_file() {
        let err = ExperimentConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        match err {
            HplcError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

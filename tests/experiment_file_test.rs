//! Integration tests for runs configured from files on disk: the experiment
//! YAML under `base_path` and the CSV recording of samples.

use hplc_interface::discovery::ModularClients;
use hplc_interface::mock::{self, MockModularDevice};
use hplc_interface::{ExperimentConfig, HplcError, HplcInterface, Settings};
use std::path::Path;
use std::time::Duration;
use tracing_test::traced_test;

const EXPERIMENT: &str = r#"
gradient:
  gradient_duration: 30.0
  initial_concentration: 5
detector:
  wavelengths: [210, 230, 254, 280, 320, 360]
"#;

fn settings_in(dir: &Path) -> Settings {
    Settings {
        base_path: dir.to_path_buf(),
        sample_frequency_hz: 20.0,
        timeout_ms: 500,
        ..Settings::default()
    }
}

async fn standard_clients(detector_attached: bool) -> ModularClients {
    let mut clients = ModularClients::new();
    clients
        .insert(MockModularDevice::hplc_controller().spawn_client())
        .await
        .unwrap();
    clients
        .insert(MockModularDevice::ultraviolet_detector_interface(detector_attached).spawn_client())
        .await
        .unwrap();
    clients
}

#[tokio::test]
async fn test_setup_reads_experiment_from_base_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), EXPERIMENT).unwrap();

    let mut interface =
        HplcInterface::with_clients(settings_in(dir.path()), standard_clients(true).await);
    interface.setup().await.unwrap();

    // Six configured wavelengths truncated to the four detector channels.
    assert_eq!(interface.wavelengths(), &[210, 230, 254, 280]);
}

#[tokio::test]
async fn test_missing_experiment_file_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let mut interface =
        HplcInterface::with_clients(settings_in(dir.path()), standard_clients(true).await);

    let err = interface.setup().await.unwrap_err();
    assert!(matches!(err, HplcError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    assert!(!interface.is_setup());
}

#[tokio::test]
async fn test_empty_wavelength_list_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.yaml"),
        "gradient: {}\ndetector:\n  wavelengths: []\n",
    )
    .unwrap();
    let mut interface =
        HplcInterface::with_clients(settings_in(dir.path()), standard_clients(true).await);

    let err = interface.setup().await.unwrap_err();
    assert!(matches!(err, HplcError::Configuration(_)));
}

#[tokio::test]
async fn test_samples_are_recorded_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), EXPERIMENT).unwrap();
    let csv_path = dir.path().join("run.csv");
    let settings = Settings {
        record_path: Some(csv_path.clone()),
        ..settings_in(dir.path())
    };

    let mut interface = HplcInterface::with_clients(settings, standard_clients(true).await);
    let mut samples = interface.subscribe();
    interface.start().await.unwrap();
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(2), samples.recv())
            .await
            .expect("sample within timeout")
            .unwrap();
    }
    interface.stop().await.unwrap();

    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert!(rows.len() >= 3, "expected at least 3 rows, got {}", rows.len());
    let sequences: Vec<&str> = rows.iter().take(3).map(|r| &r[1]).collect();
    assert_eq!(sequences, vec!["1", "2", "3"]);
    let info: serde_json::Value = serde_json::from_str(&rows[0][2]).unwrap();
    assert!(info.get("concentration").is_some());
}

#[tokio::test]
async fn test_restart_appends_to_existing_recording() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), EXPERIMENT).unwrap();
    let csv_path = dir.path().join("run.csv");
    let settings = Settings {
        record_path: Some(csv_path.clone()),
        ..settings_in(dir.path())
    };

    let mut interface = HplcInterface::with_clients(settings, standard_clients(true).await);
    for _ in 0..2 {
        let mut samples = interface.subscribe();
        interface.start().await.unwrap();
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(2), samples.recv())
                .await
                .expect("sample within timeout")
                .unwrap();
        }
        interface.stop().await.unwrap();
    }

    let contents = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(contents.matches("timestamp,sequence,gradient_info").count(), 1);
    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    let restarts = rows.iter().filter(|r| &r[1] == "1").count();
    assert_eq!(restarts, 2, "both runs should start at sequence 1");
    assert!(rows.len() >= 4, "expected rows from both runs, got {}", rows.len());
}

#[tokio::test]
#[traced_test]
async fn test_absent_detector_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), EXPERIMENT).unwrap();

    let mut interface =
        HplcInterface::with_clients(settings_in(dir.path()), standard_clients(false).await);
    interface.setup().await.unwrap();

    assert!(!interface.detector_connected());
    assert!(logs_contain(
        "ECOM Toydad UV detector is not connected to the ultraviolet_detector_interface!"
    ));
}

#[tokio::test]
async fn test_mock_rig_matches_any_experiment() {
    let experiment = ExperimentConfig::from_yaml_str(
        "gradient:\n  flow_rate: 1.2\n  column_temperature: 40\ndetector:\n  wavelengths: [254]\n",
    )
    .unwrap();
    let settings = Settings {
        sample_frequency_hz: 20.0,
        ..Settings::default()
    };
    let clients = mock::mock_clients(&settings, &experiment).await.unwrap();

    let mut interface = HplcInterface::with_clients(settings, clients).with_experiment(experiment);
    interface.setup().await.unwrap();
    assert!(interface.detector_connected());
    assert_eq!(interface.wavelengths(), &[254, 254, 254, 254]);
}

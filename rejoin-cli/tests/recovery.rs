//! End-to-end recovery scenarios against the `fake-worker` binary.

use std::path::Path;

use rejoin_core::{Phase, ScenarioState, Transition};
use rejoin_harness::{Orchestrator, ScenarioConfig};

fn scenario(dir: &Path) -> ScenarioConfig {
    let mut config = ScenarioConfig::default();
    config.worker.command = env!("CARGO_BIN_EXE_fake-worker").to_string();
    config.worker.stop_grace_ms = 1000;
    config.cluster.resilience_dir = Some(dir.join("res-data"));
    config.delivery.sequence_length = 40;
    config.delivery.send_interval_ms = 10;
    config.delivery.settle_delay_ms = 100;
    config.timeouts.readiness_secs = 10;
    config.timeouts.delivery_secs = 10;
    config.timeouts.validation_secs = 10;
    config.timeouts.recovery_marker_secs = 5;
    config
}

fn transition(from: Phase, to: Phase) -> Transition {
    Transition { from, to }
}

#[tokio::test]
async fn replacement_rejoins_and_output_matches() {
    let tmp = tempfile::tempdir().unwrap();
    let config = scenario(tmp.path());

    let report = Orchestrator::new(config).run().await;
    if let Err(failure) = &report.verdict {
        panic!("scenario failed: {}\n{}", failure, failure.diagnostics);
    }

    assert!(report.passed());
    assert_eq!(report.final_state, ScenarioState::Complete);
    assert_eq!(
        report.transitions,
        vec![
            transition(Phase::Initializing, Phase::Delivering),
            transition(Phase::Delivering, Phase::Recovering),
            transition(Phase::Recovering, Phase::Validating),
            transition(Phase::Validating, Phase::Complete),
        ]
    );
    assert_eq!(report.expected.as_deref(), Some("[40,38,36,34,32,30]"));
    assert_eq!(report.delivered, 40);
    // One window per even value
    assert_eq!(report.sink_frames, 20);
    assert!(!tmp.path().join("res-data").exists());
}

#[tokio::test]
async fn default_scenario_recovers_within_deadlines() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = ScenarioConfig::default();
    config.worker.command = env!("CARGO_BIN_EXE_fake-worker").to_string();
    config.cluster.resilience_dir = Some(tmp.path().join("res-data"));
    assert_eq!(config.delivery.sequence_length, 200);
    assert_eq!(config.delivery.batch_size, 1);
    assert_eq!(config.delivery.send_interval_ms, 50);
    assert_eq!(config.timeouts.validation_secs, 30);

    let report = Orchestrator::new(config).run().await;
    if let Err(failure) = &report.verdict {
        panic!("scenario failed: {}\n{}", failure, failure.diagnostics);
    }

    assert_eq!(report.final_state, ScenarioState::Complete);
    assert_eq!(report.expected.as_deref(), Some("[200,198,196,194,192,190]"));
    assert_eq!(report.delivered, 200);
    assert_eq!(report.sink_frames, 100);
    assert!(!tmp.path().join("res-data").exists());
}

#[tokio::test]
async fn three_worker_cluster_recovers_last_joiner() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = scenario(tmp.path());
    config.cluster.workers = 3;

    let report = Orchestrator::new(config).run().await;
    if let Err(failure) = &report.verdict {
        panic!("scenario failed: {}\n{}", failure, failure.diagnostics);
    }
    assert!(report.passed());
}

#[tokio::test]
async fn missing_reconnection_marker_is_an_assertion_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = scenario(tmp.path());
    config
        .worker
        .env
        .insert("FAKE_WORKER_SILENT_RECOVERY".into(), "1".into());
    config.timeouts.recovery_marker_secs = 1;

    let report = Orchestrator::new(config).run().await;
    assert!(!report.passed());
    assert!(matches!(
        report.final_state,
        ScenarioState::Failed {
            during: Phase::Validating,
            ..
        }
    ));

    let failure = report.verdict.unwrap_err();
    assert_eq!(failure.error.kind(), "assertion_failure");
    assert!(failure.error.to_string().contains("Restarting a listener ..."));

    // Initializer, crashed worker1 and its replacement
    let names: Vec<_> = failure
        .diagnostics
        .outputs
        .iter()
        .map(|o| o.name.as_str())
        .collect();
    assert_eq!(names, vec!["initializer", "worker1", "worker1"]);
    // The output itself was right
    let expected = rejoin_types::frame(b"[40,38,36,34,32,30]").unwrap();
    assert!(failure
        .diagnostics
        .sink_data
        .windows(expected.len())
        .any(|w| w == expected.as_slice()));
    assert!(!tmp.path().join("res-data").exists());
}

#[tokio::test]
async fn delivery_finishing_before_crash_fails_the_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = scenario(tmp.path());
    config.delivery.sequence_length = 12;
    config.delivery.send_interval_ms = 1;
    config.delivery.settle_delay_ms = 1000;

    let report = Orchestrator::new(config).run().await;
    let failure = report.verdict.unwrap_err();
    assert_eq!(failure.error.kind(), "config");
    assert!(failure.error.to_string().contains("settle_delay_ms"));
    assert!(matches!(
        report.final_state,
        ScenarioState::Failed {
            during: Phase::Delivering,
            ..
        }
    ));
}

#[tokio::test]
async fn wrong_expected_value_is_a_validation_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = scenario(tmp.path());
    config.expect.output = Some("[194,196,198,200]".into());
    config.timeouts.validation_secs = 1;

    let report = Orchestrator::new(config).run().await;
    let failure = report.verdict.unwrap_err();
    assert_eq!(failure.error.kind(), "validation_timeout");
    assert!(!failure.diagnostics.sink_data.is_empty());
}

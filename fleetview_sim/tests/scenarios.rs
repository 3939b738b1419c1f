//! Scenario runs through the public harness API.

use fleetview_core::FleetViewConfig;
use fleetview_sim::{ScenarioId, ScenarioRunner};

fn assert_passes(scenario: ScenarioId, seed: u64) {
    let result = ScenarioRunner::new(seed).run(scenario);
    assert!(
        result.passed,
        "{} (seed={}) failed: {:?}",
        scenario,
        seed,
        result.failure_reason
    );
}

#[test]
fn test_stream_drop_fails_over_and_recovers() {
    for seed in [1, 2, 3] {
        assert_passes(ScenarioId::StreamDrop, seed);
    }
}

#[test]
fn test_malformed_record_is_isolated() {
    assert_passes(ScenarioId::MalformedRecord, 11);
}

#[test]
fn test_unmount_with_poll_in_flight() {
    assert_passes(ScenarioId::UnmountInFlight, 5);
}

#[test]
fn test_initial_load_failure_recovers() {
    let result = ScenarioRunner::new(8).run(ScenarioId::InitialLoadFailure);
    assert!(result.passed, "{:?}", result.failure_reason);
    assert_eq!(result.final_robot_count, 4);
}

#[test]
fn test_floor_filter() {
    assert_passes(ScenarioId::FloorFilter, 21);
}

#[test]
fn test_faster_polling_config() {
    let mut config = FleetViewConfig::default();
    config.transport.poll_interval_ms = 500;
    let result = ScenarioRunner::new(3)
        .with_config(config)
        .run(ScenarioId::PollingOnly);
    assert!(result.passed, "{:?}", result.failure_reason);
    assert!(result.metrics.polls >= 24);
    assert!(result.metrics.max_poll_gap_ms.unwrap_or(u64::MAX) <= 500);
}

#[test]
fn test_results_serialize_for_ci() {
    let result = ScenarioRunner::new(42).run(ScenarioId::SteadyStream);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["scenario"], "steady_stream");
    assert_eq!(json["seed"], 42);
    assert!(json["metrics"]["stream_frames"].as_u64().unwrap() > 0);
}

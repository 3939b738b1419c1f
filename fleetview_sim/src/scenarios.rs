//! Fault-injection scenarios for the fleet view.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// FV-001: Healthy stream for the whole run
    SteadyStream,

    /// FV-002: Stream drops mid-session, polling bridges, stream returns
    StreamDrop,

    /// FV-003: Stream never available
    PollingOnly,

    /// FV-004: One robot reports `position: null` among healthy records
    MalformedRecord,

    /// FV-005: View unmounted while a slow poll is in flight
    UnmountInFlight,

    /// FV-006: Stream and polls both down at start, polls recover later
    InitialLoadFailure,

    /// FV-007: Multi-floor fleet with floor filter changes
    FloorFilter,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyStream,
            ScenarioId::StreamDrop,
            ScenarioId::PollingOnly,
            ScenarioId::MalformedRecord,
            ScenarioId::UnmountInFlight,
            ScenarioId::InitialLoadFailure,
            ScenarioId::FloorFilter,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "steady_stream",
            ScenarioId::StreamDrop => "stream_drop",
            ScenarioId::PollingOnly => "polling_only",
            ScenarioId::MalformedRecord => "malformed_record",
            ScenarioId::UnmountInFlight => "unmount_in_flight",
            ScenarioId::InitialLoadFailure => "initial_load_failure",
            ScenarioId::FloorFilter => "floor_filter",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "Live stream only, rendered poses track ground truth",
            ScenarioId::StreamDrop => "Stream closes at t=3s, polling without gaps, stream restored on retry",
            ScenarioId::PollingOnly => "Stream refused throughout, fleet tracked by polling alone",
            ScenarioId::MalformedRecord => "Null position on one of 5 robots: 4 update, 1 skipped, none removed",
            ScenarioId::UnmountInFlight => "Unmount during a 500ms poll: no late mutation, no further frames",
            ScenarioId::InitialLoadFailure => "Error phase with status text, then Ready once polls succeed",
            ScenarioId::FloorFilter => "Only the active floor renders, heatmap resets on floor change",
        }
    }

    /// Shortest run that exercises the whole scenario, in seconds.
    pub fn min_duration_secs(&self) -> f64 {
        match self {
            ScenarioId::StreamDrop => 20.0,
            ScenarioId::PollingOnly => 12.0,
            ScenarioId::InitialLoadFailure => 8.0,
            ScenarioId::UnmountInFlight => 6.0,
            _ => 5.0,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_stream" | "steadystream" | "fv-001" => Ok(ScenarioId::SteadyStream),
            "stream_drop" | "streamdrop" | "fv-002" => Ok(ScenarioId::StreamDrop),
            "polling_only" | "pollingonly" | "fv-003" => Ok(ScenarioId::PollingOnly),
            "malformed_record" | "malformedrecord" | "fv-004" => Ok(ScenarioId::MalformedRecord),
            "unmount_in_flight" | "unmountinflight" | "fv-005" => Ok(ScenarioId::UnmountInFlight),
            "initial_load_failure" | "initialloadfailure" | "fv-006" => Ok(ScenarioId::InitialLoadFailure),
            "floor_filter" | "floorfilter" | "fv-007" => Ok(ScenarioId::FloorFilter),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

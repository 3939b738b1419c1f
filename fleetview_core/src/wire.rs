//! Wire normalization - raw backend payloads into untyped fleet events.
//!
//! This layer only recognizes message *shapes* (snapshot, delta, status map,
//! zone list). Field values stay as `serde_json::Value` and are validated by
//! the reconciler, which is the single trust boundary.

use serde_json::{Map, Value};

/// Id keys a record may carry, in lookup order.
const ID_KEYS: [&str; 5] = ["robotId", "robot_id", "zoneId", "zone_id", "id"];

/// How a robot batch relates to the canonical map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Full snapshot from the stream: absence means removal
    StreamSnapshot,
    /// Full snapshot from a pull: absence counts as a miss
    PollSnapshot,
    /// Partial update: absence means unchanged
    Delta,
}

/// Robot records as received, plus explicit removals for deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotBatch {
    pub kind: BatchKind,
    pub records: Vec<Value>,
    pub removed: Vec<String>,
}

impl RobotBatch {
    pub fn snapshot(kind: BatchKind, records: Vec<Value>) -> Self {
        Self {
            kind,
            records,
            removed: Vec::new(),
        }
    }

    pub fn delta(records: Vec<Value>, removed: Vec<String>) -> Self {
        Self {
            kind: BatchKind::Delta,
            records,
            removed,
        }
    }
}

/// Zone records as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneBatch {
    /// Full list (absent zones are removed) or partial
    pub full: bool,
    pub records: Vec<Value>,
    pub removed: Vec<String>,
}

/// One unit of inbound data, independent of which transport carried it.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    Robots(RobotBatch),
    Zones(ZoneBatch),
}

/// Payloads that cannot be interpreted at all.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(&'static str),
}

/// Parses one streaming frame.
///
/// Returns an empty list for well-formed frames that carry no fleet data
/// (heartbeats, acks).
pub fn parse_stream_frame(text: &str) -> Result<Vec<FleetEvent>, WireError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut object) = value else {
        return Err(WireError::UnexpectedShape("stream frame is not an object"));
    };

    // Some backends wrap the payload: {"type": "...", "data": {...}}
    if let Some(Value::Object(inner)) = object.remove("data") {
        object = inner;
    }

    let mut events = Vec::new();

    if let Some(robots) = object.remove("robots") {
        events.push(FleetEvent::Robots(RobotBatch::snapshot(
            BatchKind::StreamSnapshot,
            records_from(robots)?,
        )));
        if let Some(zones) = object.remove("zones") {
            events.push(FleetEvent::Zones(ZoneBatch {
                full: true,
                records: records_from(zones)?,
                removed: Vec::new(),
            }));
        }
        return Ok(events);
    }

    if object.contains_key("updated") || object.contains_key("removed") {
        let records = match object.remove("updated") {
            Some(updated) => records_from(updated)?,
            None => Vec::new(),
        };
        let removed = object.remove("removed").map(ids_from).unwrap_or_default();
        events.push(FleetEvent::Robots(RobotBatch::delta(records, removed)));
        return Ok(events);
    }

    if let Some(zones) = object.remove("zones") {
        events.push(FleetEvent::Zones(ZoneBatch {
            full: true,
            records: records_from(zones)?,
            removed: Vec::new(),
        }));
    }

    Ok(events)
}

/// Parses the body of `GET .../simulation/status` into a poll snapshot.
///
/// Accepts a map keyed by robot id, a `{"robots": ...}` wrapper, or an array.
pub fn parse_status_body(text: &str) -> Result<RobotBatch, WireError> {
    let value: Value = serde_json::from_str(text)?;
    let records = match value {
        Value::Object(mut object) => match object.remove("robots") {
            Some(robots) => records_from(robots)?,
            None => records_from(Value::Object(object))?,
        },
        other => records_from(other)?,
    };
    Ok(RobotBatch::snapshot(BatchKind::PollSnapshot, records))
}

/// Parses the body of `GET .../zones` into a full zone list.
pub fn parse_zones_body(text: &str) -> Result<ZoneBatch, WireError> {
    let value: Value = serde_json::from_str(text)?;
    let records = match value {
        Value::Object(mut object) => match object.remove("zones") {
            Some(zones) => records_from(zones)?,
            None => records_from(Value::Object(object))?,
        },
        other => records_from(other)?,
    };
    Ok(ZoneBatch {
        full: true,
        records,
        removed: Vec::new(),
    })
}

/// Flattens an array or an id-keyed map into a list of records.
///
/// Map keys become the record id when the record carries none.
fn records_from(value: Value) -> Result<Vec<Value>, WireError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, record)| match record {
                Value::Object(mut fields) => {
                    if !has_id(&fields) {
                        fields.insert("id".to_string(), Value::String(key));
                    }
                    Value::Object(fields)
                }
                // Left for the reconciler to reject
                other => other,
            })
            .collect()),
        _ => Err(WireError::UnexpectedShape("records must be an array or an object")),
    }
}

fn has_id(fields: &Map<String, Value>) -> bool {
    ID_KEYS
        .iter()
        .any(|key| fields.get(*key).map_or(false, |v| !v.is_null()))
}

fn ids_from(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(id_string).collect(),
        single => id_string(single).into_iter().collect(),
    }
}

/// Coerces a string or integer id into its string form.
pub(crate) fn id_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_snapshot_with_zones() {
        let frame = json!({
            "robots": [{"robot_id": "r1"}, {"robot_id": "r2"}],
            "zones": [{"zone_id": "z1"}]
        })
        .to_string();
        let events = parse_stream_frame(&frame).unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            FleetEvent::Robots(batch) => {
                assert_eq!(batch.kind, BatchKind::StreamSnapshot);
                assert_eq!(batch.records.len(), 2);
            }
            other => panic!("expected robots, got {:?}", other),
        }
        assert!(matches!(&events[1], FleetEvent::Zones(z) if z.full && z.records.len() == 1));
    }

    #[test]
    fn test_stream_delta() {
        let frame = json!({"updated": [{"id": "r1"}], "removed": ["r2", 7, null]}).to_string();
        let events = parse_stream_frame(&frame).unwrap();
        match &events[..] {
            [FleetEvent::Robots(batch)] => {
                assert_eq!(batch.kind, BatchKind::Delta);
                assert_eq!(batch.records.len(), 1);
                assert_eq!(batch.removed, vec!["r2".to_string(), "7".to_string()]);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_frame() {
        let frame = json!({"type": "fleet", "data": {"robots": {}}}).to_string();
        let events = parse_stream_frame(&frame).unwrap();
        assert!(matches!(&events[..], [FleetEvent::Robots(b)] if b.records.is_empty()));
    }

    #[test]
    fn test_heartbeat_is_empty() {
        assert!(parse_stream_frame(r#"{"type":"ping"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_frames_are_errors() {
        assert!(matches!(parse_stream_frame("not json"), Err(WireError::Json(_))));
        assert!(matches!(parse_stream_frame("[1,2]"), Err(WireError::UnexpectedShape(_))));
        assert!(parse_stream_frame(r#"{"robots": 5}"#).is_err());
    }

    #[test]
    fn test_status_map_keys_become_ids() {
        let body = json!({
            "r1": {"battery_level": 50},
            "r2": {"robot_id": "explicit"}
        })
        .to_string();
        let batch = parse_status_body(&body).unwrap();
        assert_eq!(batch.kind, BatchKind::PollSnapshot);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0]["id"], json!("r1"));
        assert_eq!(batch.records[1]["robot_id"], json!("explicit"));
        assert!(batch.records[1].get("id").is_none());
    }

    #[test]
    fn test_status_wrapper_and_array() {
        let wrapped = parse_status_body(r#"{"robots": [{"id": "a"}]}"#).unwrap();
        assert_eq!(wrapped.records.len(), 1);
        let array = parse_status_body(r#"[{"id": "a"}, {"id": "b"}]"#).unwrap();
        assert_eq!(array.records.len(), 2);
    }

    #[test]
    fn test_zones_body() {
        let zones = parse_zones_body(r#"{"zones": [{"id": "z1"}, {"id": "z2"}]}"#).unwrap();
        assert!(zones.full);
        assert_eq!(zones.records.len(), 2);
        assert!(parse_zones_body("\"nope\"").is_err());
    }
}

// ── Delta demultiplexing ──
//
// Turns one `DeltaFrame` into typed events: metadata (one event per
// `properties` key), notifications (`notifications.` namespace), and data
// points (composite objects flattened to `parent.key`). Pure; no I/O.

use chrono::{DateTime, Utc};
use serde_json::Value;
use skipper_api::frame::{DeltaFrame, Update};

use crate::model::{Context, DataPointUpdate, MetaUpdate, NotificationUpdate};

const NOTIFICATION_PREFIX: &str = "notifications.";
const UNKNOWN_SOURCE: &str = "unknown";

/// One event derived from a delta frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    Data(DataPointUpdate),
    Meta(MetaUpdate),
    Notification(NotificationUpdate),
}

/// Split a delta frame into events, resolving its context against the
/// vessel's own identity.
pub fn parse_delta(frame: &DeltaFrame, self_id: Option<&str>) -> Vec<DeltaEvent> {
    let context = Context::resolve(frame.context.as_deref(), self_id);
    let mut events = Vec::new();
    for update in &frame.updates {
        parse_update(update, &context, &mut events);
    }
    events
}

fn parse_update(update: &Update, context: &Context, events: &mut Vec<DeltaEvent>) {
    for entry in &update.meta {
        match entry.value.get("properties").and_then(Value::as_object) {
            Some(properties) => {
                for (key, meta) in properties {
                    events.push(DeltaEvent::Meta(MetaUpdate {
                        context: context.clone(),
                        path: join_path(&entry.path, key),
                        meta: meta.clone(),
                    }));
                }
            }
            None => events.push(DeltaEvent::Meta(MetaUpdate {
                context: context.clone(),
                path: entry.path.clone(),
                meta: entry.value.clone(),
            })),
        }
    }

    if update.values.is_empty() {
        return;
    }

    let source = update
        .source_label()
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_owned());
    let timestamp = parse_timestamp(update.timestamp.as_deref());

    for entry in &update.values {
        if entry.path.starts_with(NOTIFICATION_PREFIX) {
            events.push(DeltaEvent::Notification(NotificationUpdate {
                context: context.clone(),
                path: entry.path.clone(),
                source: source.clone(),
                timestamp,
                value: entry.value.clone(),
            }));
            continue;
        }

        match &entry.value {
            Value::Object(obj) => {
                for (key, value) in obj {
                    events.push(DeltaEvent::Data(DataPointUpdate {
                        context: context.clone(),
                        path: join_path(&entry.path, key),
                        source: source.clone(),
                        timestamp,
                        value: value.clone(),
                    }));
                }
            }
            value => events.push(DeltaEvent::Data(DataPointUpdate {
                context: context.clone(),
                path: entry.path.clone(),
                source: source.clone(),
                timestamp,
                value: value.clone(),
            })),
        }
    }
}

/// `parent.key`, without the leading dot an empty parent would leave
/// (the `defaults` source and other vessels send `""` paths).
fn join_path(parent: &str, key: &str) -> String {
    let joined = format!("{parent}.{key}");
    joined.trim_start_matches('.').to_owned()
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn frame(value: Value) -> DeltaFrame {
        serde_json::from_value(value).unwrap()
    }

    fn data(events: &[DeltaEvent]) -> Vec<(String, Value)> {
        events
            .iter()
            .filter_map(|e| match e {
                DeltaEvent::Data(d) => Some((d.path.clone(), d.value.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_values_keep_source_and_timestamp() {
        let events = parse_delta(
            &frame(json!({
                "updates": [{
                    "$source": "nmea0183.GP",
                    "timestamp": "2025-01-01T00:00:00.000Z",
                    "values": [{ "path": "navigation.speedOverGround", "value": 3.2 }]
                }]
            })),
            None,
        );
        let [DeltaEvent::Data(update)] = events.as_slice() else {
            panic!("expected one data event, got {events:?}");
        };
        assert!(update.context.is_self());
        assert_eq!(update.source, "nmea0183.GP");
        assert_eq!(update.timestamp.timestamp(), 1_735_689_600);
        assert_eq!(update.value, json!(3.2));
    }

    #[test]
    fn composite_values_are_flattened() {
        let events = parse_delta(
            &frame(json!({
                "context": "vessels.urn:mrn:imo:mmsi:230000000",
                "updates": [{
                    "$source": "n2k.1",
                    "values": [{
                        "path": "navigation.position",
                        "value": { "latitude": 60.1, "longitude": 24.9 }
                    }]
                }]
            })),
            Some("vessels.urn:mrn:imo:mmsi:230000000"),
        );
        assert_eq!(
            data(&events),
            vec![
                ("navigation.position.latitude".into(), json!(60.1)),
                ("navigation.position.longitude".into(), json!(24.9)),
            ]
        );
    }

    #[test]
    fn empty_parent_paths_lose_leading_dot() {
        let events = parse_delta(
            &frame(json!({
                "context": "vessels.urn:mrn:imo:mmsi:111",
                "updates": [{
                    "$source": "defaults",
                    "values": [{ "path": "", "value": { "name": "Other Boat" } }]
                }]
            })),
            Some("vessels.urn:mrn:imo:mmsi:230000000"),
        );
        let [DeltaEvent::Data(update)] = events.as_slice() else {
            panic!("expected one data event");
        };
        assert_eq!(update.path, "name");
        assert_eq!(update.context, Context::Other("vessels.urn:mrn:imo:mmsi:111".into()));
    }

    #[test]
    fn notifications_are_routed_separately() {
        let events = parse_delta(
            &frame(json!({
                "updates": [{
                    "$source": "alarms",
                    "values": [{
                        "path": "notifications.environment.depth.belowKeel",
                        "value": { "state": "alarm", "message": "Shallow water" }
                    }]
                }]
            })),
            None,
        );
        let [DeltaEvent::Notification(n)] = events.as_slice() else {
            panic!("expected one notification");
        };
        assert_eq!(n.state(), Some("alarm"));
        assert_eq!(n.message(), Some("Shallow water"));
    }

    #[test]
    fn meta_properties_split_per_key() {
        let events = parse_delta(
            &frame(json!({
                "updates": [{
                    "meta": [
                        { "path": "navigation.speedOverGround", "value": { "units": "m/s" } },
                        { "path": "", "value": { "properties": {
                            "design.draft": { "units": "m" },
                            "design.length": { "units": "m" }
                        }}}
                    ]
                }]
            })),
            None,
        );
        let paths: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                DeltaEvent::Meta(m) => Some(m.path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            paths,
            vec!["navigation.speedOverGround", "design.draft", "design.length"]
        );
    }
}

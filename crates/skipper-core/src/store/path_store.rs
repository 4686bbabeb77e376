// ── Path data store ──
//
// Canonical live value cache keyed by fully qualified path. The store is
// the only writer of path records; consumers see deep copies on query and
// live values through per-(consumer, path, source) `watch` slots.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

use crate::model::{
    DataPointUpdate, MetaUpdate, PathMeta, PathRecord, PathUpdate, SourceValue,
    ValueType, Zone, ZoneNotification, ZoneState,
};
use crate::stream::PathStream;

const ALARM_CHANNEL_SIZE: usize = 256;

/// Paths whose numeric values arrive in degrees and are stored in radians.
const DEGREE_PATHS: [&str; 2] = [
    "navigation.position.latitude",
    "navigation.position.longitude",
];

// ── Unit conversion seam ─────────────────────────────────────────────

/// Converts a path value into the unit a zone is expressed in.
pub trait UnitConverter: Send + Sync {
    /// Convert `value`, expressed in `from` (the path's metadata unit, if
    /// known), into `to`. `None` if no conversion exists.
    fn convert(&self, from: Option<&str>, to: &str, value: f64) -> Option<f64>;
}

/// Compares zone bounds against the raw value.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl UnitConverter for IdentityConverter {
    fn convert(&self, _from: Option<&str>, _to: &str, value: f64) -> Option<f64> {
        Some(value)
    }
}

// ── PathStore ────────────────────────────────────────────────────────

struct Registration {
    consumer: String,
    source: String,
    slot: watch::Sender<PathUpdate>,
}

#[derive(Default)]
struct RateWindow {
    second: i64,
    count: u64,
}

pub struct PathStore {
    records: DashMap<String, PathRecord>,
    /// Lock order: a `records` guard is never held while a
    /// `registrations` guard is taken.
    registrations: DashMap<String, Vec<Registration>>,
    zones: ArcSwap<Vec<Zone>>,
    converter: ArcSwap<Box<dyn UnitConverter>>,
    alarms: broadcast::Sender<Arc<ZoneNotification>>,
    rate: watch::Sender<u64>,
    window: Mutex<RateWindow>,
}

impl Default for PathStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PathStore {
    pub fn new() -> Self {
        let (alarms, _) = broadcast::channel(ALARM_CHANNEL_SIZE);
        let (rate, _) = watch::channel(0);
        let converter: Box<dyn UnitConverter> = Box::new(IdentityConverter);
        Self {
            records: DashMap::new(),
            registrations: DashMap::new(),
            zones: ArcSwap::from_pointee(Vec::new()),
            converter: ArcSwap::from_pointee(converter),
            alarms,
            rate,
            window: Mutex::new(RateWindow::default()),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Follow `path` as read from `source` (`"default"` for the
    /// server-prioritised value).
    ///
    /// Idempotent per `(consumer, path, source)`: a repeated call returns
    /// a new handle on the same slot. A fresh slot is seeded with the
    /// current value and zone state, or null/normal if the path is unknown.
    pub fn subscribe(&self, consumer: &str, path: &str, source: &str) -> PathStream {
        let mut registrations = self.registrations.entry(path.to_owned()).or_default();
        if let Some(existing) = registrations
            .iter()
            .find(|r| r.consumer == consumer && r.source == source)
        {
            return PathStream::new(existing.slot.subscribe());
        }

        let seed = self
            .records
            .get(path)
            .map(|record| {
                record.update_for(source).unwrap_or_else(|| PathUpdate {
                    state: record.state,
                    ..PathUpdate::default()
                })
            })
            .unwrap_or_default();
        let (slot, receiver) = watch::channel(seed);
        registrations.push(Registration {
            consumer: consumer.to_owned(),
            source: source.to_owned(),
            slot,
        });
        debug!(consumer, path, source, "path subscription added");
        PathStream::new(receiver)
    }

    /// Drop every registration of `consumer` on `path`. Open handles see
    /// their stream end.
    pub fn unsubscribe(&self, consumer: &str, path: &str) {
        let emptied = match self.registrations.get_mut(path) {
            Some(mut registrations) => {
                registrations.retain(|r| r.consumer != consumer);
                registrations.is_empty()
            }
            None => return,
        };
        if emptied {
            self.registrations.remove_if(path, |_, r| r.is_empty());
        }
    }

    /// Number of registrations on `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.registrations.get(path).map_or(0, |r| r.len())
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Apply one data point: record it under both the default and its own
    /// source, re-evaluate zones, and push to every subscriber of the path.
    pub fn apply_value(&self, update: &DataPointUpdate) {
        self.count_delta(Utc::now());

        let path = update.context.qualify(&update.path);
        let value = normalize(&update.path, &update.value);

        let (snapshot, previous) = {
            let mut record = self
                .records
                .entry(path.clone())
                .or_insert_with(|| PathRecord::new(path.clone(), update.context.is_self()));

            if record.default_source.is_none() {
                record.default_source = Some(update.source.clone());
            }
            if record.value_type.is_none() {
                record.value_type = ValueType::infer(&value);
            }
            record.current_value = Some(value.clone());
            record.timestamp = Some(update.timestamp);
            record.sources.insert(
                update.source.clone(),
                SourceValue {
                    timestamp: update.timestamp,
                    value: value.clone(),
                },
            );

            let unit = record.meta.as_ref().and_then(PathMeta::units);
            let state = self.evaluate_zones(&path, unit, value.as_f64());
            let previous = std::mem::replace(&mut record.state, state);
            (record.value().clone(), previous)
        };

        if previous != snapshot.state {
            info!(path = %path, from = %previous, to = %snapshot.state, "zone state changed");
            let _ = self.alarms.send(Arc::new(ZoneNotification {
                path: path.clone(),
                previous,
                state: snapshot.state,
                value: value.as_f64(),
                timestamp: update.timestamp,
            }));
        }

        self.publish(&snapshot);
    }

    /// Attach metadata, creating a placeholder record when no value has
    /// been seen yet. Source and type stay unset for the first value.
    pub fn apply_meta(&self, update: &MetaUpdate) {
        let path = update.context.qualify(&update.path);
        let mut record = self
            .records
            .entry(path.clone())
            .or_insert_with(|| PathRecord::new(path, update.context.is_self()));
        record
            .meta
            .get_or_insert_with(PathMeta::default)
            .merge(&update.meta);
    }

    /// Push a null value with normal state to every subscriber of `path`.
    /// The stored record is left as is.
    pub fn timeout_path(&self, path: &str) {
        if let Some(registrations) = self.registrations.get(path) {
            debug!(path, "timing out path");
            for registration in registrations.iter() {
                registration.slot.send_replace(PathUpdate::default());
            }
        }
    }

    /// Forget every record and null out all subscribers. Registrations
    /// survive so consumers keep following their paths.
    pub fn clear(&self) {
        self.records.clear();
        for registrations in self.registrations.iter() {
            for registration in registrations.value() {
                registration.slot.send_replace(PathUpdate::default());
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Known paths, sorted, optionally filtered by declared type and
    /// restricted to the own vessel.
    pub fn paths_by_type(&self, value_type: Option<ValueType>, self_only: bool) -> Vec<String> {
        let paths: BTreeSet<String> = self
            .records
            .iter()
            .filter(|r| !self_only || r.is_self)
            .filter(|r| value_type.is_none() || r.value_type == value_type)
            .map(|r| r.key().clone())
            .collect();
        paths.into_iter().collect()
    }

    /// A deep copy of the record for `path`.
    pub fn path_record(&self, path: &str) -> Option<PathRecord> {
        self.records.get(path).map(|r| r.value().clone())
    }

    /// The `units` metadata of `path`.
    pub fn path_unit(&self, path: &str) -> Option<String> {
        self.records
            .get(path)
            .and_then(|r| r.meta.as_ref().and_then(PathMeta::units).map(str::to_owned))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Zones and diagnostics ────────────────────────────────────────

    /// Replace the zone table. Takes effect on the next value per path.
    pub fn set_zones(&self, zones: Vec<Zone>) {
        self.zones.store(Arc::new(zones));
    }

    pub fn zones(&self) -> Arc<Vec<Zone>> {
        self.zones.load_full()
    }

    pub fn set_unit_converter(&self, converter: Box<dyn UnitConverter>) {
        self.converter.store(Arc::new(converter));
    }

    /// Zone state transitions.
    pub fn alarms(&self) -> broadcast::Receiver<Arc<ZoneNotification>> {
        self.alarms.subscribe()
    }

    /// Data points applied during the last completed second.
    pub fn delta_rate(&self) -> watch::Receiver<u64> {
        self.rate.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self, record: &PathRecord) {
        let Some(registrations) = self.registrations.get(&record.path) else {
            return;
        };
        for registration in registrations.iter() {
            match record.update_for(&registration.source) {
                Some(update) => {
                    registration.slot.send_replace(update);
                }
                None => error!(
                    path = %record.path,
                    source = %registration.source,
                    consumer = %registration.consumer,
                    "subscriber requested an unknown source"
                ),
            }
        }
    }

    /// Highest severity among the zones of `path` containing `value`.
    fn evaluate_zones(&self, path: &str, unit: Option<&str>, value: Option<f64>) -> ZoneState {
        let Some(value) = value else {
            return ZoneState::Normal;
        };
        let zones = self.zones.load();
        let converter = self.converter.load();
        zones
            .iter()
            .filter(|zone| zone.path == path)
            .filter(|zone| {
                let converted = match zone.unit.as_deref() {
                    Some(to) => converter.convert(unit, to, value),
                    None => Some(value),
                };
                converted.is_some_and(|v| zone.contains(v))
            })
            .map(|zone| zone.state)
            .max()
            .unwrap_or_default()
    }

    fn count_delta(&self, now: DateTime<Utc>) {
        let second = now.timestamp();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.second != second {
            if window.second != 0 {
                self.rate.send_replace(window.count);
            }
            window.second = second;
            window.count = 0;
        }
        window.count += 1;
    }
}

/// Degrees to radians for position fields; everything else unchanged.
fn normalize(path: &str, value: &Value) -> Value {
    if DEGREE_PATHS.contains(&path) {
        if let Some(degrees) = value.as_f64() {
            return Value::from(degrees.to_radians());
        }
    }
    value.clone()
}

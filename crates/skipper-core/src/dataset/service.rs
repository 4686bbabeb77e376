// ── Dataset service ──
//
// Owns every registered series. Each series runs one task that seeds the
// buffer from history, then samples its path from the store at the
// configured interval. Edits and removals stop the running task and drop
// its store subscription before anything else happens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backfill::{HistorySource, fetch_backfill, should_seed_history};
use super::buffer::DatasetBuffer;
use crate::error::CoreError;
use crate::model::{DatasetConfig, DatasetSample, TimeScale, ValueDomain};
use crate::store::PathStore;
use crate::stream::DatasetStream;

const LIVE_CHANNEL_SIZE: usize = 256;

type SharedHistory = Arc<Box<dyn HistorySource>>;

/// State shared between a series' task and its subscribers.
struct SeriesShared {
    buffer: Mutex<DatasetBuffer>,
    live: broadcast::Sender<DatasetSample>,
    /// Flips to `true` once backfill has finished.
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl SeriesShared {
    fn lock_buffer(&self) -> MutexGuard<'_, DatasetBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Series {
    config: DatasetConfig,
    shared: Arc<SeriesShared>,
    task: JoinHandle<()>,
}

impl Drop for Series {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        self.task.abort();
    }
}

pub struct DatasetService {
    store: Arc<PathStore>,
    history: ArcSwapOption<Box<dyn HistorySource>>,
    series: Mutex<HashMap<String, Series>>,
}

impl DatasetService {
    pub fn new(store: Arc<PathStore>) -> Self {
        Self {
            store,
            history: ArcSwapOption::empty(),
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Set (or clear) where backfill comes from. Applies to series started
    /// afterwards.
    pub fn set_history_source(&self, source: Option<Box<dyn HistorySource>>) {
        self.history.store(source.map(Arc::new));
    }

    pub fn has_history_source(&self) -> bool {
        self.history.load().is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register a widget-owned series sized by `time_scale`.
    pub async fn create(
        &self,
        path: &str,
        source: &str,
        time_scale: TimeScale,
        domain: ValueDomain,
    ) -> Result<DatasetConfig, CoreError> {
        let config = DatasetConfig {
            editable: false,
            ..DatasetConfig::new(path, source, time_scale).with_domain(domain)
        };
        self.register(config.clone()).await?;
        Ok(config)
    }

    /// Start a series. Resolves once backfill has completed or failed.
    pub async fn register(&self, config: DatasetConfig) -> Result<(), CoreError> {
        validate(&config)?;
        let shared = {
            let mut series = self.lock_series();
            if series.contains_key(&config.uuid) {
                return Err(CoreError::DatasetExists { uuid: config.uuid });
            }
            info!(uuid = %config.uuid, path = %config.path, source = %config.source, "registering series");
            self.start(&mut series, config)
        };
        wait_ready(&shared).await;
        Ok(())
    }

    /// Register saved series, typically a profile's persisted list on
    /// start-up. Entries that fail to register are logged and skipped.
    /// Returns how many were started.
    pub async fn restore(&self, configs: impl IntoIterator<Item = DatasetConfig>) -> usize {
        let mut restored = 0;
        for config in configs {
            let uuid = config.uuid.clone();
            match self.register(config).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(uuid = %uuid, error = %e, "could not restore series"),
            }
        }
        restored
    }

    /// Replace a series' configuration. The running task is stopped before
    /// the new one starts; the buffer starts over.
    pub async fn edit(&self, config: DatasetConfig) -> Result<(), CoreError> {
        validate(&config)?;
        let shared = {
            let mut series = self.lock_series();
            let Some(old) = series.remove(&config.uuid) else {
                return Err(CoreError::DatasetNotFound { uuid: config.uuid });
            };
            self.stop(old);
            info!(uuid = %config.uuid, path = %config.path, "restarting edited series");
            self.start(&mut series, config)
        };
        wait_ready(&shared).await;
        Ok(())
    }

    /// Stop and forget a series. Its subscribers' streams end.
    pub fn remove(&self, uuid: &str) -> Result<DatasetConfig, CoreError> {
        let old = self
            .lock_series()
            .remove(uuid)
            .ok_or_else(|| CoreError::DatasetNotFound { uuid: uuid.to_owned() })?;
        info!(uuid, path = %old.config.path, "removing series");
        let config = old.config.clone();
        self.stop(old);
        Ok(config)
    }

    /// Remove widget-owned series nobody is subscribed to. Returns the
    /// removed UUIDs.
    pub fn remove_abandoned(&self) -> Vec<String> {
        let abandoned: Vec<Series> = {
            let mut series = self.lock_series();
            let uuids: Vec<String> = series
                .iter()
                .filter(|(_, s)| !s.config.editable && s.shared.live.receiver_count() == 0)
                .map(|(uuid, _)| uuid.clone())
                .collect();
            uuids.iter().filter_map(|uuid| series.remove(uuid)).collect()
        };
        abandoned
            .into_iter()
            .map(|old| {
                let uuid = old.config.uuid.clone();
                debug!(uuid = %uuid, "removing abandoned series");
                self.stop(old);
                uuid
            })
            .collect()
    }

    /// Stop every series.
    pub fn clear(&self) {
        let drained: Vec<Series> = self.lock_series().drain().map(|(_, s)| s).collect();
        for old in drained {
            self.stop(old);
        }
    }

    // ── Access ───────────────────────────────────────────────────────

    /// Batch-then-live subscription. Waits for backfill to finish so the
    /// batch includes it.
    pub async fn subscribe(&self, uuid: &str) -> Result<DatasetStream, CoreError> {
        let shared = self
            .lock_series()
            .get(uuid)
            .map(|s| Arc::clone(&s.shared))
            .ok_or_else(|| CoreError::DatasetNotFound { uuid: uuid.to_owned() })?;
        wait_ready(&shared).await;

        // Samples are pushed and broadcast under the buffer lock.
        let buffer = shared.lock_buffer();
        Ok(DatasetStream::new(buffer.snapshot(), shared.live.subscribe()))
    }

    pub fn config(&self, uuid: &str) -> Option<DatasetConfig> {
        self.lock_series().get(uuid).map(|s| s.config.clone())
    }

    /// All series configurations, ordered by label.
    pub fn configs(&self) -> Vec<DatasetConfig> {
        let mut configs: Vec<DatasetConfig> =
            self.lock_series().values().map(|s| s.config.clone()).collect();
        configs.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.uuid.cmp(&b.uuid)));
        configs
    }

    /// Current buffer contents of a series.
    pub fn snapshot(&self, uuid: &str) -> Option<Vec<DatasetSample>> {
        let shared = self.lock_series().get(uuid).map(|s| Arc::clone(&s.shared))?;
        let buffer = shared.lock_buffer();
        Some(buffer.snapshot())
    }

    pub fn len(&self) -> usize {
        self.lock_series().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_series().is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn start(&self, series: &mut HashMap<String, Series>, config: DatasetConfig) -> Arc<SeriesShared> {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_SIZE);
        let (ready, _) = watch::channel(false);
        let shared = Arc::new(SeriesShared {
            buffer: Mutex::new(DatasetBuffer::for_config(&config)),
            live,
            ready,
            cancel: CancellationToken::new(),
        });

        let task = tokio::spawn(run_series(
            Arc::clone(&self.store),
            self.history.load_full(),
            config.clone(),
            Arc::clone(&shared),
        ));

        series.insert(
            config.uuid.clone(),
            Series {
                config,
                shared: Arc::clone(&shared),
                task,
            },
        );
        shared
    }

    /// Drop the store subscription, then the task (via `Drop`).
    fn stop(&self, old: Series) {
        old.shared.cancel.cancel();
        self.store.unsubscribe(&old.config.uuid, &old.config.path);
    }

    fn lock_series(&self) -> MutexGuard<'_, HashMap<String, Series>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DatasetService {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Reject configurations a sampling task cannot run with.
fn validate(config: &DatasetConfig) -> Result<(), CoreError> {
    let reason = if config.path.is_empty() {
        "series path is empty"
    } else if config.sample_time == 0 {
        "sample time must be at least 1 ms"
    } else if config.max_data_points == 0 {
        "a series needs room for at least one point"
    } else {
        return Ok(());
    };
    Err(CoreError::ValidationFailed {
        message: format!("{}: {reason}", config.uuid),
    })
}

/// Resolves once backfill is done or the series was stopped.
async fn wait_ready(shared: &SeriesShared) {
    let mut ready = shared.ready.subscribe();
    tokio::select! {
        _ = ready.wait_for(|ready| *ready) => {}
        () = shared.cancel.cancelled() => {}
    }
}

/// Backfill, then sample the path until cancelled.
///
/// Sampling keeps the latest numeric value seen and pushes it once per
/// interval; intervals without a new value push nothing.
async fn run_series(
    store: Arc<PathStore>,
    history: Option<SharedHistory>,
    config: DatasetConfig,
    shared: Arc<SeriesShared>,
) {
    let cancel = shared.cancel.clone();
    if let Some(history) = history.filter(|_| should_seed_history(&config)) {
        let source: &dyn HistorySource = &**history;
        let points = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            points = fetch_backfill(source, &config, Utc::now()) => points,
        };
        let count = shared.lock_buffer().push_batch(points);
        debug!(uuid = %config.uuid, count, "seeded series from history");
    }
    shared.ready.send_replace(true);

    let mut stream = store.subscribe(&config.uuid, &config.path, &config.source);
    let mut pending = stream.current().as_f64();

    let mut ticker = tokio::time::interval(config.sample_time());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = stream.changed() => {
                let Some(update) = changed else {
                    debug!(uuid = %config.uuid, "path subscription closed");
                    break;
                };
                if let Some(value) = update.as_f64() {
                    pending = Some(value);
                }
            }
            _ = ticker.tick() => {
                if let Some(value) = pending.take() {
                    let mut buffer = shared.lock_buffer();
                    let sample = buffer.push(Utc::now().timestamp_millis(), value);
                    // No receivers is fine.
                    let _ = shared.live.send(sample);
                }
            }
        }
    }
}

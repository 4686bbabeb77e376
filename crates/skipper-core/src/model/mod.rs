// ── Domain model ──
//
// Canonical representations of what flows through the pipeline: path
// records and their live values, alarm zones, stream events derived from
// Signal K deltas, and dataset (time-series) configuration and samples.

pub mod dataset;
pub mod path;
pub mod update;
pub mod zone;

// ── Re-exports ──────────────────────────────────────────────────────

pub use dataset::{DatasetConfig, DatasetEvent, DatasetSample, TimeScale, ValueDomain};
pub use path::{
    Context, DEFAULT_SOURCE, PathMeta, PathRecord, PathUpdate, SourceValue, ValueType,
};
pub use update::{
    DataPointUpdate, EndpointStatus, MetaUpdate, NotificationUpdate, SelfIdentity, StreamStatus,
};
pub use zone::{Zone, ZoneNotification, ZoneState};

//! Reactive data layer between `skipper-api` and dashboard consumers.
//!
//! This crate owns the connection lifecycle, the live path store, and the
//! time-series engine that widgets chart from:
//!
//! - **[`Controller`]**: facade wiring everything together.
//!   [`connect()`](Controller::connect) starts discovery, the streaming
//!   supervisor and the bridges that feed the store.
//!
//! - **[`ConnectionStateMachine`]**: single source of truth for the
//!   discovery/streaming lifecycle, with retry scheduling and a debounced
//!   `Connected` status.
//!
//! - **[`PathStore`]**: one record per Signal K path, per-consumer
//!   [`PathStream`] subscriptions bound to a source, and alarm-zone
//!   evaluation on every value.
//!
//! - **[`DatasetService`]**: sampled series with moving averages, running
//!   statistics (circular for directions) and optional history backfill,
//!   consumed through [`DatasetStream`].

pub mod config;
pub mod connection;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectionConfig, RetryPolicy, TlsVerification};
pub use connection::{
    ConnectionState, ConnectionStateMachine, ConnectionStatus, DiscoveryService, Severity,
    StreamSettings, StreamingService,
};
pub use controller::Controller;
pub use dataset::{DatasetBuffer, DatasetService, HistorySource};
pub use error::CoreError;
pub use store::{IdentityConverter, PathStore, UnitConverter};
pub use stream::{DatasetStream, PathStream};

pub use model::{
    Context, DEFAULT_SOURCE, DataPointUpdate, DatasetConfig, DatasetEvent, DatasetSample,
    EndpointStatus, MetaUpdate, NotificationUpdate, PathMeta, PathRecord, PathUpdate,
    SelfIdentity, SourceValue, StreamStatus, TimeScale, ValueDomain, ValueType, Zone,
    ZoneNotification, ZoneState,
};

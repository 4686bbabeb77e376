// ── Time-series engine ──
//
// Per-series sampling, moving averages, running statistics (linear or
// circular), history backfill and batch-then-live subscriptions.

pub mod backfill;
pub mod buffer;
pub mod circular;
mod service;

pub use backfill::{HistorySource, history_resolution_secs, should_seed_history};
pub use buffer::DatasetBuffer;
pub use circular::{CircularStats, circular_mean, circular_stats};
pub use service::DatasetService;

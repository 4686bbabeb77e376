// ── Path data store ──

mod path_store;

pub use path_store::{IdentityConverter, PathStore, UnitConverter};

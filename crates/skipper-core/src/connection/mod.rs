// Connection layer: state machine, discovery, and the streaming channel.

pub mod delta;
pub mod discovery;
pub mod state;
pub mod streaming;

pub use delta::{DeltaEvent, parse_delta};
pub use discovery::{DiscoveryService, resolve_endpoints};
pub use state::{ConnectionState, ConnectionStateMachine, ConnectionStatus, RetryCallback, Severity};
pub use streaming::{StreamSettings, StreamingService};

// skipper-api: Async Rust client for Signal K servers (discovery, streaming, history)

pub mod discovery;
pub mod error;
pub mod frame;
pub mod history;
pub mod transport;
pub mod websocket;

pub use discovery::{DiscoveryClient, DiscoveryResponse, ServerInfo};
pub use error::Error;
pub use frame::{DeltaFrame, HelloFrame, InboundFrame, ResponseFrame, Update};
pub use history::{HistoryClient, HistoryQuery, HistoryResponse, HistoryRow};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{ChannelEvent, ReconnectConfig, StreamingChannel, streaming_url};

//! Runtime side of the mail queue: configuration, transports, dispatch workers.

pub mod config;
pub mod dispatch;
pub mod transport;


pub use config::{ConfigError, DispatchConfig};
pub use dispatch::{DispatchError, DispatchStats, Dispatcher, DispatcherHandle};
pub use transport::{RecordingTransport, Transport, TransportError};

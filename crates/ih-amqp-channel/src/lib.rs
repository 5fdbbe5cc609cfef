//! AMQP channel for IoT hub communication.
//!
//! Provides the transport seam and the hub-facing pieces built on it:
//! - `ConnectionFactory` / `Connection` / `Session` / link traits (mockable in tests)
//! - `HubConnector` opening the connection to a hub endpoint
//! - `CbsAuthenticator` performing the claims-based-security put-token exchange
//! - `MockHub` in-memory transport for testing without a hub

pub mod cbs;
pub mod config;
pub mod connector;
pub mod error;
pub mod mock;
pub mod tls;
pub mod transport;

// Re-exports for convenience.
pub use cbs::{CbsAuthenticator, CbsOutcome};
pub use config::HubConfig;
pub use connector::HubConnector;
pub use error::{AmqpError, AmqpResult};
pub use mock::{CbsReply, MockConnectionFactory, MockHub};
pub use tls::{ConnectOptions, TlsMode};
pub use transport::{
    Address, Closed, ClosedNotifier, ClosedSignal, Connection, ConnectionFactory, Delivery,
    ErrorCondition, ReceiverLink, SenderLink, Session,
};

//! Transport seam: the connection, session and link operations the hub
//! client needs from an AMQP 1.0 implementation.
//!
//! Frame encoding, TLS and socket handling live behind these traits. An
//! AMQP library adapter implements them in production, and
//! [`crate::mock::MockHub`] implements them in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use ih_protocol::Message;

use crate::error::AmqpResult;
use crate::tls::ConnectOptions;

// ── Addressing ────────────────────────────────────────────────

/// Network endpoint of a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "amqps://{}:{}", self.host, self.port)
    }
}

// ── Close notifications ───────────────────────────────────────

/// Error condition attached to a close performative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    pub condition: String,
    pub description: Option<String>,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: Some(description.into()),
        }
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.condition),
            None => f.write_str(&self.condition),
        }
    }
}

/// Outcome of a connection or session closing. `error` is `None` for a clean close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Closed {
    pub error: Option<ErrorCondition>,
}

/// Sending half of a close notification, held by the transport.
#[derive(Debug, Clone)]
pub struct ClosedNotifier(Arc<watch::Sender<Option<Closed>>>);

/// Receiving half of a close notification. Resolves once, when the
/// endpoint closes.
#[derive(Debug, Clone)]
pub struct ClosedSignal(watch::Receiver<Option<Closed>>);

/// Create a linked notifier/signal pair.
pub fn closed_channel() -> (ClosedNotifier, ClosedSignal) {
    let (tx, rx) = watch::channel(None);
    (ClosedNotifier(Arc::new(tx)), ClosedSignal(rx))
}

impl ClosedNotifier {
    /// Record the close. Only the first call has any effect.
    pub fn notify(&self, error: Option<ErrorCondition>) -> bool {
        self.0.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(Closed { error });
            true
        })
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn subscribe(&self) -> ClosedSignal {
        ClosedSignal(self.0.subscribe())
    }
}

impl ClosedSignal {
    /// Wait for the close. A dropped notifier counts as a clean close.
    pub async fn wait(mut self) -> Closed {
        match self.0.wait_for(Option::is_some).await {
            Ok(state) => state.clone().unwrap_or_default(),
            Err(_) => Closed::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().is_some()
    }
}

// ── Deliveries ────────────────────────────────────────────────

/// A message received on a link, awaiting settlement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_id: u64,
    pub message: Arc<Message>,
}

// ── Transport traits ──────────────────────────────────────────

/// Opens transport connections to a hub endpoint.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open_connection(
        &self,
        address: &Address,
        options: &ConnectOptions,
    ) -> AmqpResult<Arc<dyn Connection>>;
}

/// An open transport connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Begin a new session on this connection.
    async fn open_session(&self) -> AmqpResult<Box<dyn Session>>;

    /// Signal that resolves when the connection closes, for any reason.
    fn closed(&self) -> ClosedSignal;

    /// Close the connection, waiting at most `linger` for the peer.
    /// Closing cascades to every session and link on the connection.
    async fn close(&self, linger: Duration) -> AmqpResult<()>;
}

/// A session multiplexed over a connection.
#[async_trait]
pub trait Session: Send + Sync {
    async fn open_sender(&self, name: &str, address: &str) -> AmqpResult<Arc<dyn SenderLink>>;

    async fn open_receiver(&self, name: &str, address: &str) -> AmqpResult<Box<dyn ReceiverLink>>;

    /// Signal that resolves when the session ends, for any reason.
    fn closed(&self) -> ClosedSignal;

    async fn close(&self) -> AmqpResult<()>;
}

/// Outbound link.
#[async_trait]
pub trait SenderLink: Send + Sync {
    /// Send a message and wait for the peer to settle it.
    async fn send(&self, message: Message) -> AmqpResult<()>;

    async fn close(&self) -> AmqpResult<()>;
}

/// Inbound link with credit-based flow control.
#[async_trait]
pub trait ReceiverLink: Send + Sync {
    /// Set the link credit: how many more messages the peer may send
    /// before waiting for a further grant.
    async fn set_credit(&self, credit: u32) -> AmqpResult<()>;

    /// Wait for the next delivery. `Ok(None)` means the link has closed.
    async fn receive(&self) -> AmqpResult<Option<Delivery>>;

    /// Settle a delivery with the accepted outcome.
    async fn accept(&self, delivery: &Delivery) -> AmqpResult<()>;

    async fn close(&self) -> AmqpResult<()>;
}

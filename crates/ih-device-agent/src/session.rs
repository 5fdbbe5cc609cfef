//! Device session state machine.
//!
//! `Created → Authenticating → Open → Closed`, with `Failed` reached when
//! the initial authentication fails or token renewal keeps failing. While
//! `Open` the session owns the AMQP session with the event sender and the
//! device-bound receiver, a renewal task, a receive dispatch task and two
//! close watchers. All background tasks run inside the session's
//! `device_session` span and stop when the session closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use ih_amqp_channel::{
    CbsAuthenticator, ClosedSignal, Connection, HubConnector, SenderLink, Session,
};
use ih_protocol::addresses::{self, DEVICE_BOUND_LINK_NAME, EVENTS_LINK_NAME};
use ih_protocol::{Message, PropertyValue};

use crate::broadcaster::{ChannelObserver, MessageBroadcaster, Notification, Observer, Subscription};
use crate::dispatch;
use crate::error::{DeviceError, DeviceResult, SessionClosedError};
use crate::identity::DeviceIdentity;
use crate::renewal;

// ── State ─────────────────────────────────────────────────────

/// Lifecycle state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Authenticating,
    Open,
    Closed,
    Failed,
}

impl SessionState {
    /// `Closed` and `Failed` are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        })
    }
}

// ── Options ───────────────────────────────────────────────────

/// Timing and flow-control settings of a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// How often the token is renewed while open.
    pub renewal_period: Duration,
    /// Validity of each signed token. Must exceed `renewal_period`.
    pub token_ttl: Duration,
    /// Credit window on the device-bound link.
    pub receive_credit: u32,
    /// Upper bound on a single outbound send.
    pub send_timeout: Duration,
    /// How long `close` lets the peer acknowledge the connection close.
    pub close_linger: Duration,
    /// Consecutive renewal failures before the session fails. 0 never fails.
    pub renewal_failure_limit: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            renewal_period: Duration::from_secs(2 * 60),
            token_ttl: Duration::from_secs(3 * 60),
            receive_credit: 5,
            send_timeout: Duration::from_secs(30),
            close_linger: Duration::from_secs(6),
            renewal_failure_limit: 3,
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> DeviceResult<()> {
        if self.renewal_period.is_zero() {
            return Err(DeviceError::InvalidOptions(
                "renewal period must be non-zero".into(),
            ));
        }
        if self.token_ttl <= self.renewal_period {
            return Err(DeviceError::InvalidOptions(format!(
                "token ttl ({}s) must exceed the renewal period ({}s)",
                self.token_ttl.as_secs(),
                self.renewal_period.as_secs()
            )));
        }
        if self.receive_credit == 0 {
            return Err(DeviceError::InvalidOptions(
                "receive credit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Shared session state ──────────────────────────────────────

pub(crate) struct SessionInner {
    identity: DeviceIdentity,
    pub(crate) options: SessionOptions,
    connection: Arc<dyn Connection>,
    authenticator: CbsAuthenticator,
    broadcaster: MessageBroadcaster,
    state: watch::Sender<SessionState>,
    /// Held for the duration of each put-token exchange.
    auth_lock: tokio::sync::Mutex<()>,
    session: Mutex<Option<Arc<dyn Session>>>,
    sender: Mutex<Option<Arc<dyn SenderLink>>>,
    /// Cancels every background task, close watchers included.
    cancel: CancellationToken,
    /// Child of `cancel`: dispatch and renewal only.
    work: CancellationToken,
    connection_closed: AtomicBool,
    span: tracing::Span,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "session state");
            *state = next;
            true
        });
    }

    /// Sign a fresh token and put it on the connection. Exchanges never
    /// overlap.
    pub(crate) async fn authenticate(&self) -> DeviceResult<()> {
        let _in_flight = self.auth_lock.lock().await;
        let token = self.identity.sign_token(self.options.token_ttl)?;
        let outcome = self
            .authenticator
            .put_token(
                self.connection.as_ref(),
                &token.to_string(),
                self.identity.resource_uri(),
            )
            .await?;

        if outcome.is_success() {
            debug!(expiry = token.expiry, "token accepted");
            Ok(())
        } else {
            Err(DeviceError::AuthenticationFailed(outcome.to_string()))
        }
    }

    /// Move to the terminal `target` state and drop the links. Returns
    /// whether this call made the transition.
    fn release(&self, target: SessionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            debug!(from = %state, to = %target, "session state");
            *state = target;
            true
        });
        self.work.cancel();
        lock(&self.sender).take();
        lock(&self.session).take();
        changed
    }

    async fn close_connection(&self) {
        if self.connection_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.connection.close(self.options.close_linger).await {
            warn!(error = %e, "failed to close hub connection");
        }
    }

    /// Escalate after repeated renewal failures: `Open → Failed`, terminal
    /// error to observers, connection closed.
    pub(crate) async fn fail(&self, description: String) {
        self.cancel.cancel();
        if self.release(SessionState::Failed) {
            error!(%description, "device session failed");
            self.broadcaster
                .notify_error(&SessionClosedError::new(description));
        }
        self.close_connection().await;
    }
}

// ── DeviceSession ─────────────────────────────────────────────

/// An authenticated device connection to the hub.
///
/// Obtained from [`DeviceSession::connect`] or [`connect_device`] only after
/// the initial token was accepted. Call [`close`](Self::close) to shut it
/// down; dropping it stops the background tasks without the close linger.
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    /// Authenticate `identity` on `connection` and open the device links.
    ///
    /// On any failure the connection is closed and no session is returned.
    pub async fn connect(
        connection: Arc<dyn Connection>,
        identity: DeviceIdentity,
        authenticator: CbsAuthenticator,
        options: SessionOptions,
    ) -> DeviceResult<Self> {
        let span = tracing::info_span!("device_session", device_id = %identity.device_id());
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(SessionState::Created);

        let session = Self {
            inner: Arc::new(SessionInner {
                identity,
                options,
                connection,
                authenticator,
                broadcaster: MessageBroadcaster::new(),
                state,
                auth_lock: tokio::sync::Mutex::new(()),
                session: Mutex::new(None),
                sender: Mutex::new(None),
                work: cancel.child_token(),
                cancel,
                connection_closed: AtomicBool::new(false),
                span: span.clone(),
            }),
        };

        let result = session.start().instrument(span.clone()).await;
        match result {
            Ok(()) => Ok(session),
            Err(e) => {
                let inner = &session.inner;
                error!(parent: &span, error = %e, "device session could not be established");
                inner.cancel.cancel();
                inner.release(SessionState::Failed);
                inner.close_connection().instrument(span).await;
                Err(e)
            }
        }
    }

    async fn start(&self) -> DeviceResult<()> {
        let inner = &self.inner;
        inner.options.validate()?;

        inner.set_state(SessionState::Authenticating);
        inner.authenticate().await?;

        let device_id = inner.identity.device_id();
        let session: Arc<dyn Session> = Arc::from(inner.connection.open_session().await?);
        let links = async {
            let sender = session
                .open_sender(EVENTS_LINK_NAME, &addresses::events(device_id))
                .await?;
            let receiver = session
                .open_receiver(DEVICE_BOUND_LINK_NAME, &addresses::device_bound(device_id))
                .await?;
            receiver.set_credit(inner.options.receive_credit).await?;
            Ok::<_, DeviceError>((sender, receiver))
        };
        let (sender, receiver) = match links.await {
            Ok(links) => links,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "failed to close device session");
                }
                return Err(e);
            }
        };

        let session_closed = session.closed();
        *lock(&inner.sender) = Some(sender);
        *lock(&inner.session) = Some(session);

        self.spawn(dispatch::run(
            receiver,
            inner.broadcaster.clone(),
            inner.options.receive_credit,
            inner.work.clone(),
        ));
        self.spawn(renewal::run(inner.clone(), inner.work.clone()));
        self.spawn(watch_session(
            inner.clone(),
            session_closed,
            inner.connection.closed(),
        ));
        self.spawn(watch_connection(inner.clone(), inner.connection.closed()));

        inner.set_state(SessionState::Open);
        info!(
            renewal_period_secs = inner.options.renewal_period.as_secs(),
            receive_credit = inner.options.receive_credit,
            "device session open"
        );
        Ok(())
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task.instrument(self.inner.span.clone()));
    }

    pub fn device_id(&self) -> &str {
        self.inner.identity.device_id()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Send a device event with `subject`, application properties copied
    /// from `data`, and `body` as UTF-8.
    pub async fn send_message<K, V>(
        &self,
        subject: &str,
        data: impl IntoIterator<Item = (K, V)>,
        body: &str,
    ) -> DeviceResult<()>
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        self.send(Message::event(subject, data, body)).await
    }

    /// Send a pre-built message on the event link.
    pub async fn send(&self, message: Message) -> DeviceResult<()> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(DeviceError::NotConnected { state });
        }
        let sender = lock(&self.inner.sender).clone();
        let Some(sender) = sender else {
            return Err(DeviceError::NotConnected {
                state: self.state(),
            });
        };

        let timeout = self.inner.options.send_timeout;
        match tokio::time::timeout(timeout, sender.send(message)).await {
            Ok(result) => result.map_err(DeviceError::from),
            Err(_) => Err(DeviceError::Timeout {
                operation: "send",
                timeout_ms: millis(timeout),
            }),
        }
    }

    /// Register `observer` for inbound messages and the terminal error.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        self.inner.broadcaster.subscribe(observer)
    }

    /// Subscribe through a channel instead of a callback.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Notification>) {
        let (observer, rx) = ChannelObserver::new();
        (self.subscribe(observer), rx)
    }

    pub fn broadcaster(&self) -> &MessageBroadcaster {
        &self.inner.broadcaster
    }

    /// Renew the token now. Waits for any renewal already in flight.
    pub async fn renew_token(&self) -> DeviceResult<()> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(DeviceError::NotConnected { state });
        }
        self.inner
            .authenticate()
            .instrument(self.inner.span.clone())
            .await
    }

    /// Close the session and its connection. Observers are not notified.
    /// Safe to call more than once.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();
        if inner.release(SessionState::Closed) {
            info!(parent: &inner.span, "device session closed");
        }
        inner.close_connection().instrument(inner.span.clone()).await;
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id())
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// How long a session end waits for its connection to follow before it is
/// treated as a session-only close.
const CONNECTION_CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Surfaces an unexpected end of the device's AMQP session to observers.
async fn watch_session(inner: Arc<SessionInner>, session: ClosedSignal, connection: ClosedSignal) {
    let closed = tokio::select! {
        biased;
        _ = inner.cancel.cancelled() => return,
        closed = session.wait() => closed,
    };
    // A dropped connection ends its sessions too, in either order; that is
    // only logged. Transports may flag the connection after the session.
    let connection_lost = tokio::select! {
        biased;
        _ = inner.cancel.cancelled() => return,
        lost = tokio::time::timeout(CONNECTION_CLOSE_GRACE, connection.wait()) => {
            lost.is_ok()
        }
    };
    if connection_lost || inner.cancel.is_cancelled() {
        return;
    }

    let description = closed
        .error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "session ended by the hub".to_string());
    warn!(%description, "device session closed unexpectedly");
    if inner.release(SessionState::Closed) {
        inner
            .broadcaster
            .notify_error(&SessionClosedError::new(description));
    }
}

/// Logs a transport-level close. No reconnect is attempted.
async fn watch_connection(inner: Arc<SessionInner>, connection: ClosedSignal) {
    let closed = tokio::select! {
        biased;
        _ = inner.cancel.cancelled() => return,
        closed = connection.wait() => closed,
    };
    match closed.error {
        Some(e) => warn!(error = %e, "hub connection closed"),
        None => warn!("hub connection closed"),
    }
    inner.connection_closed.store(true, Ordering::SeqCst);
    inner.release(SessionState::Closed);
}

/// Connect `device_id` to the hub behind `connector` and authenticate it
/// with the base64 `device_key`.
pub async fn connect_device(
    connector: &HubConnector,
    device_id: &str,
    device_key: &str,
    options: SessionOptions,
) -> DeviceResult<DeviceSession> {
    options.validate()?;
    let identity = DeviceIdentity::new(
        device_id,
        device_key,
        connector.device_resource_uri(device_id),
    )?;
    let connection = connector.connect().await?;
    let authenticator = CbsAuthenticator::from_config(connector.config());
    DeviceSession::connect(connection, identity, authenticator, options).await
}

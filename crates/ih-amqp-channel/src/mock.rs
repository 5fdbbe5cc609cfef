//! In-memory hub for testing without a real AMQP endpoint.
//!
//! `MockHub` implements the transport traits end to end: it answers
//! put-token requests from a scripted reply queue, records every sent
//! message, feeds device-bound messages to the receiver link under real
//! credit accounting, and can simulate unexpected session or connection
//! closure.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::trace;

use ih_protocol::Message;
use ih_protocol::addresses::{self, CBS_NODE, LinkKind};

use crate::error::{AmqpError, AmqpResult};
use crate::tls::{ConnectOptions, WIRE_TRACE_TARGET};
use crate::transport::{
    Address, ClosedNotifier, ClosedSignal, Connection, ConnectionFactory, Delivery,
    ErrorCondition, ReceiverLink, SenderLink, Session, closed_channel,
};

// ── Scripted CBS replies ──────────────────────────────────────

/// How the mock answers the next put-token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbsReply {
    Status { code: i64, description: String },
    MissingProperties,
    MissingApplicationProperties,
    /// Swallow the request; the authenticator waits until its timeout.
    NoReply,
}

impl CbsReply {
    pub fn status(code: i64, description: impl Into<String>) -> Self {
        Self::Status {
            code,
            description: description.into(),
        }
    }

    pub fn ok() -> Self {
        Self::status(200, "OK")
    }

    fn into_message(self, request: &Message) -> Option<Message> {
        let correlation = request.message_id().unwrap_or_default().to_string();
        match self {
            Self::Status { code, description } => Some(
                Message::new(Vec::new())
                    .with_message_id(correlation)
                    .with_property("status-code", code)
                    .with_property("status-description", description),
            ),
            Self::MissingProperties => {
                Some(Message::new(Vec::new()).with_property("status-code", 200))
            }
            Self::MissingApplicationProperties => {
                Some(Message::new(Vec::new()).with_message_id(correlation))
            }
            Self::NoReply => None,
        }
    }
}

// ── Credit-controlled delivery queue ──────────────────────────

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Message>,
    credit: u32,
    unsettled: usize,
    max_unsettled: usize,
    delivered: u64,
    accepted: u64,
    credit_grants: u64,
    next_delivery_id: u64,
    closed: bool,
}

/// Messages waiting for a receiver, released one per unit of link credit.
#[derive(Debug, Default)]
struct MockQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MockQueue {
    fn push(&self, message: Message) {
        self.state.lock().unwrap().items.push_back(message);
        self.notify.notify_waiters();
    }

    fn set_credit(&self, credit: u32) {
        {
            let mut state = self.state.lock().unwrap();
            state.credit = credit;
            state.credit_grants += 1;
        }
        self.notify.notify_waiters();
    }

    fn accept(&self) {
        let mut state = self.state.lock().unwrap();
        state.unsettled = state.unsettled.saturating_sub(1);
        state.accepted += 1;
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    /// Attach a fresh link: credit starts at zero, queued messages stay.
    fn attach(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = false;
        state.credit = 0;
        state.unsettled = 0;
    }

    async fn receive(&self) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return None;
                }
                if state.credit > 0 {
                    if let Some(message) = state.items.pop_front() {
                        state.credit -= 1;
                        state.unsettled += 1;
                        state.max_unsettled = state.max_unsettled.max(state.unsettled);
                        state.delivered += 1;
                        state.next_delivery_id += 1;
                        return Some(Delivery {
                            delivery_id: state.next_delivery_id,
                            message: Arc::new(message),
                        });
                    }
                }
            }
            notified.await;
        }
    }
}

// ── Hub-wide recorder ─────────────────────────────────────────

#[derive(Debug, Default)]
struct HubState {
    connect_calls: Vec<(Address, ConnectOptions)>,
    fail_next_connect: Option<String>,
    cbs_replies: VecDeque<CbsReply>,
    put_token_requests: Vec<Message>,
    sent: Vec<(String, Message)>,
    fail_sends: Option<String>,
    stall_sends: bool,
    opened_links: Vec<(String, String)>,
    open_links: usize,
    sessions_opened: usize,
    sessions_closed: usize,
    connection_closes: usize,
}

#[derive(Debug, Default)]
struct HubShared {
    state: Mutex<HubState>,
    /// Device-bound queues keyed by device id.
    inbound: Mutex<BTreeMap<String, Arc<MockQueue>>>,
}

impl HubShared {
    fn inbound_queue(&self, device_id: &str) -> Arc<MockQueue> {
        self.inbound
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    fn inbound_queues(&self) -> Vec<Arc<MockQueue>> {
        self.inbound.lock().unwrap().values().cloned().collect()
    }

    fn inbound_total(&self, f: impl Fn(&QueueState) -> u64) -> u64 {
        self.inbound_queues()
            .iter()
            .map(|q| f(&q.state.lock().unwrap()))
            .sum()
    }

    fn link_closed(&self) {
        let mut state = self.state.lock().unwrap();
        state.open_links = state.open_links.saturating_sub(1);
    }
}

/// In-memory hub implementing the transport traits.
#[derive(Debug, Default)]
pub struct MockHub {
    shared: Arc<HubShared>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A `ConnectionFactory` handing out connections to this hub.
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ConnectionFactory> {
        Arc::new(MockConnectionFactory { hub: self.clone() })
    }

    /// Open a connection directly, as the factory would.
    pub async fn connect(
        &self,
        address: &Address,
        options: &ConnectOptions,
    ) -> AmqpResult<Arc<dyn Connection>> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.connect_calls.push((address.clone(), options.clone()));
            if let Some(reason) = state.fail_next_connect.take() {
                return Err(AmqpError::Connect(reason));
            }
        }
        if options.trace_frames {
            trace!(target: WIRE_TRACE_TARGET, %address, "open");
        }

        let (closed, _) = closed_channel();
        let connection = Arc::new(MockConnection {
            hub: self.shared.clone(),
            closed,
            sessions: Mutex::new(Vec::new()),
            trace_frames: options.trace_frames,
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }

    // ── Scripting ─────────────────────────────────────────────

    /// Make the next connect attempt fail.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.shared.state.lock().unwrap().fail_next_connect = Some(reason.into());
    }

    /// Queue the reply for a future put-token request. When the queue is
    /// empty requests are answered with 200.
    pub fn queue_cbs_reply(&self, reply: CbsReply) {
        self.shared.state.lock().unwrap().cbs_replies.push_back(reply);
    }

    /// Queue a message for the device-bound link of `device_id`.
    pub fn push_inbound(&self, device_id: &str, message: Message) {
        self.shared.inbound_queue(device_id).push(message);
    }

    /// Make outbound (non-CBS) sends fail with `reason`, or succeed again with `None`.
    pub fn fail_sends(&self, reason: Option<String>) {
        self.shared.state.lock().unwrap().fail_sends = reason;
    }

    /// Make outbound (non-CBS) sends hang until cancelled.
    pub fn stall_sends(&self, stalled: bool) {
        self.shared.state.lock().unwrap().stall_sends = stalled;
    }

    /// End every open session with `error`, as a hub-initiated detach would.
    pub fn close_sessions(&self, error: Option<ErrorCondition>) {
        for connection in self.connections.lock().unwrap().iter() {
            connection.close_sessions(error.clone());
        }
    }

    /// Drop every connection with `error`, as a network failure would.
    pub fn drop_connection(&self, error: Option<ErrorCondition>) {
        for connection in self.connections.lock().unwrap().iter() {
            connection.closed.notify(error.clone());
            connection.close_sessions(error.clone());
        }
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn connect_calls(&self) -> Vec<(Address, ConnectOptions)> {
        self.shared.state.lock().unwrap().connect_calls.clone()
    }

    pub fn put_token_requests(&self) -> Vec<Message> {
        self.shared.state.lock().unwrap().put_token_requests.clone()
    }

    /// All messages sent to non-CBS addresses, with their target address.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.shared.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<Message> {
        self.shared
            .state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// `(link name, address)` of every link ever attached.
    pub fn opened_links(&self) -> Vec<(String, String)> {
        self.shared.state.lock().unwrap().opened_links.clone()
    }

    /// Links attached and not yet closed.
    pub fn open_link_count(&self) -> usize {
        self.shared.state.lock().unwrap().open_links
    }

    pub fn sessions_opened(&self) -> usize {
        self.shared.state.lock().unwrap().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.shared.state.lock().unwrap().sessions_closed
    }

    /// Number of times `Connection::close` was called on any connection.
    pub fn connection_closes(&self) -> usize {
        self.shared.state.lock().unwrap().connection_closes
    }

    /// Current credit on the device-bound link of `device_id`.
    pub fn inbound_credit(&self, device_id: &str) -> u32 {
        self.shared.inbound_queue(device_id).state.lock().unwrap().credit
    }

    /// Messages for `device_id` not yet delivered.
    pub fn pending_inbound(&self, device_id: &str) -> usize {
        self.shared
            .inbound_queue(device_id)
            .state
            .lock()
            .unwrap()
            .items
            .len()
    }

    /// Largest number of delivered-but-unaccepted messages seen on any
    /// device-bound link.
    pub fn max_unsettled(&self) -> usize {
        self.shared
            .inbound_queues()
            .iter()
            .map(|q| q.state.lock().unwrap().max_unsettled)
            .max()
            .unwrap_or(0)
    }

    /// Device-bound deliveries across all devices.
    pub fn delivered_count(&self) -> u64 {
        self.shared.inbound_total(|q| q.delivered)
    }

    /// Device-bound accepts across all devices.
    pub fn accepted_count(&self) -> u64 {
        self.shared.inbound_total(|q| q.accepted)
    }

    pub fn credit_grants(&self) -> u64 {
        self.shared.inbound_total(|q| q.credit_grants)
    }

    /// Wait until `count` device-bound messages have been accepted.
    pub async fn wait_for_accepted(&self, count: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.accepted_count() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

/// `ConnectionFactory` backed by a [`MockHub`].
#[derive(Debug, Clone)]
pub struct MockConnectionFactory {
    hub: Arc<MockHub>,
}

impl MockConnectionFactory {
    pub fn new(hub: Arc<MockHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn open_connection(
        &self,
        address: &Address,
        options: &ConnectOptions,
    ) -> AmqpResult<Arc<dyn Connection>> {
        self.hub.connect(address, options).await
    }
}

// ── Connection ────────────────────────────────────────────────

#[derive(Debug)]
struct MockConnection {
    hub: Arc<HubShared>,
    closed: ClosedNotifier,
    sessions: Mutex<Vec<Arc<SessionShared>>>,
    trace_frames: bool,
}

impl MockConnection {
    fn close_sessions(&self, error: Option<ErrorCondition>) {
        let sessions = self.sessions.lock().unwrap().clone();
        for session in sessions {
            session.end(&self.hub, error.clone());
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn open_session(&self) -> AmqpResult<Box<dyn Session>> {
        if self.closed.is_closed() {
            return Err(AmqpError::Closed("connection"));
        }
        self.hub.state.lock().unwrap().sessions_opened += 1;

        let (closed, _) = closed_channel();
        let shared = Arc::new(SessionShared {
            closed,
            cbs: Arc::new(MockQueue::default()),
            inbound: Mutex::new(Vec::new()),
        });
        self.sessions.lock().unwrap().push(shared.clone());
        if self.trace_frames {
            trace!(target: WIRE_TRACE_TARGET, "begin");
        }

        Ok(Box::new(MockSession {
            hub: self.hub.clone(),
            shared,
            trace_frames: self.trace_frames,
        }))
    }

    fn closed(&self) -> ClosedSignal {
        self.closed.subscribe()
    }

    async fn close(&self, linger: Duration) -> AmqpResult<()> {
        self.hub.state.lock().unwrap().connection_closes += 1;
        if self.trace_frames {
            trace!(target: WIRE_TRACE_TARGET, linger_ms = linger.as_millis() as u64, "close");
        }
        self.closed.notify(None);
        self.close_sessions(None);
        Ok(())
    }
}

// ── Session ───────────────────────────────────────────────────

#[derive(Debug)]
struct SessionShared {
    closed: ClosedNotifier,
    cbs: Arc<MockQueue>,
    /// Device-bound queues attached through this session.
    inbound: Mutex<Vec<Arc<MockQueue>>>,
}

impl SessionShared {
    fn end(&self, hub: &HubShared, error: Option<ErrorCondition>) {
        if !self.closed.notify(error) {
            return;
        }
        hub.state.lock().unwrap().sessions_closed += 1;
        self.cbs.close();
        for queue in self.inbound.lock().unwrap().drain(..) {
            queue.close();
        }
    }
}

struct MockSession {
    hub: Arc<HubShared>,
    shared: Arc<SessionShared>,
    trace_frames: bool,
}

impl MockSession {
    fn record_attach(&self, name: &str, address: &str) -> AmqpResult<()> {
        if self.shared.closed.is_closed() {
            return Err(AmqpError::Closed("session"));
        }
        let mut state = self.hub.state.lock().unwrap();
        state
            .opened_links
            .push((name.to_string(), address.to_string()));
        state.open_links += 1;
        if self.trace_frames {
            trace!(target: WIRE_TRACE_TARGET, name, address, "attach");
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn open_sender(&self, name: &str, address: &str) -> AmqpResult<Arc<dyn SenderLink>> {
        self.record_attach(name, address)?;
        Ok(Arc::new(MockSender {
            hub: self.hub.clone(),
            session: self.shared.clone(),
            address: address.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn open_receiver(
        &self,
        name: &str,
        address: &str,
    ) -> AmqpResult<Box<dyn ReceiverLink>> {
        let device_bound = addresses::parse_address(address)
            .filter(|parsed| parsed.kind == LinkKind::DeviceBound)
            .map(|parsed| parsed.device_id);
        if address != CBS_NODE && device_bound.is_none() {
            return Err(AmqpError::Link(format!("no receivable node at '{address}'")));
        }
        self.record_attach(name, address)?;

        let queue = match device_bound {
            Some(device_id) => {
                let queue = self.hub.inbound_queue(&device_id);
                queue.attach();
                self.shared.inbound.lock().unwrap().push(queue.clone());
                queue
            }
            None => self.shared.cbs.clone(),
        };
        Ok(Box::new(MockReceiver {
            hub: self.hub.clone(),
            queue,
            closed: AtomicBool::new(false),
        }))
    }

    fn closed(&self) -> ClosedSignal {
        self.shared.closed.subscribe()
    }

    async fn close(&self) -> AmqpResult<()> {
        self.shared.end(&self.hub, None);
        Ok(())
    }
}

// ── Links ─────────────────────────────────────────────────────

struct MockSender {
    hub: Arc<HubShared>,
    session: Arc<SessionShared>,
    address: String,
    closed: AtomicBool,
}

#[async_trait]
impl SenderLink for MockSender {
    async fn send(&self, message: Message) -> AmqpResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.session.closed.is_closed() {
            return Err(AmqpError::Closed("sender link"));
        }

        if self.address == CBS_NODE {
            let reply = {
                let mut state = self.hub.state.lock().unwrap();
                state.put_token_requests.push(message.clone());
                state.cbs_replies.pop_front().unwrap_or_else(CbsReply::ok)
            };
            if let Some(response) = reply.into_message(&message) {
                self.session.cbs.push(response);
            }
            return Ok(());
        }

        let stalled = {
            let mut state = self.hub.state.lock().unwrap();
            if let Some(reason) = &state.fail_sends {
                return Err(AmqpError::Send(reason.clone()));
            }
            if !state.stall_sends {
                state.sent.push((self.address.clone(), message));
            }
            state.stall_sends
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&self) -> AmqpResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.link_closed();
        }
        Ok(())
    }
}

struct MockReceiver {
    hub: Arc<HubShared>,
    queue: Arc<MockQueue>,
    closed: AtomicBool,
}

#[async_trait]
impl ReceiverLink for MockReceiver {
    async fn set_credit(&self, credit: u32) -> AmqpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AmqpError::Closed("receiver link"));
        }
        self.queue.set_credit(credit);
        Ok(())
    }

    async fn receive(&self) -> AmqpResult<Option<Delivery>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.queue.receive().await)
    }

    async fn accept(&self, _delivery: &Delivery) -> AmqpResult<()> {
        self.queue.accept();
        Ok(())
    }

    async fn close(&self) -> AmqpResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.queue.close();
            self.hub.link_closed();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connection(hub: &Arc<MockHub>) -> Arc<dyn Connection> {
        hub.connect(&Address::new("hub", 5671), &ConnectOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_records_calls_and_can_fail() {
        let hub = MockHub::new();
        hub.fail_next_connect("refused");

        let err = hub.factory()
            .open_connection(&Address::new("hub", 5671), &ConnectOptions::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, AmqpError::Connect(ref r) if r == "refused"));

        connection(&hub).await;
        assert_eq!(hub.connect_calls().len(), 2);
    }

    #[tokio::test]
    async fn sends_are_recorded_per_address() {
        let hub = MockHub::new();
        let conn = connection(&hub).await;
        let session = conn.open_session().await.unwrap();
        let sender = session.open_sender("s", "/devices/d/messages/events").await.unwrap();

        sender.send(Message::new("a")).await.unwrap();
        sender.send(Message::new("b")).await.unwrap();

        let sent = hub.sent_to("/devices/d/messages/events");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].body_text(), Some("b"));
        assert!(hub.sent_to("/devices/other/messages/events").is_empty());
    }

    #[tokio::test]
    async fn receiver_respects_credit() {
        let hub = MockHub::new();
        let conn = connection(&hub).await;
        let session = conn.open_session().await.unwrap();
        let receiver = session
            .open_receiver("r", "/devices/d/messages/deviceBound")
            .await
            .unwrap();

        hub.push_inbound("d", Message::new("1"));
        hub.push_inbound("d", Message::new("2"));

        // No credit yet: nothing is delivered.
        let blocked =
            tokio::time::timeout(Duration::from_millis(20), receiver.receive()).await;
        assert!(blocked.is_err());

        receiver.set_credit(1).await.unwrap();
        let first = receiver.receive().await.unwrap().unwrap();
        assert_eq!(first.message.body_text(), Some("1"));
        assert_eq!(hub.inbound_credit("d"), 0);
        assert_eq!(hub.pending_inbound("d"), 1);

        receiver.accept(&first).await.unwrap();
        assert_eq!(hub.accepted_count(), 1);
        assert_eq!(hub.max_unsettled(), 1);
    }

    #[tokio::test]
    async fn device_bound_queues_are_per_device() {
        let hub = MockHub::new();
        let first = connection(&hub).await.open_session().await.unwrap();
        let second = connection(&hub).await.open_session().await.unwrap();
        let a = first
            .open_receiver("r", "/devices/a/messages/deviceBound")
            .await
            .unwrap();
        a.set_credit(5).await.unwrap();

        hub.push_inbound("b", Message::new("for-b"));
        hub.push_inbound("a", Message::new("for-a"));

        // Attaching b's link leaves a's credit alone.
        let b = second
            .open_receiver("r", "/devices/b/messages/deviceBound")
            .await
            .unwrap();
        assert_eq!(hub.inbound_credit("a"), 5);
        assert_eq!(hub.inbound_credit("b"), 0);

        let got = a.receive().await.unwrap().unwrap();
        assert_eq!(got.message.body_text(), Some("for-a"));
        assert_eq!(hub.pending_inbound("b"), 1);

        b.set_credit(1).await.unwrap();
        let got = b.receive().await.unwrap().unwrap();
        assert_eq!(got.message.body_text(), Some("for-b"));
        assert_eq!(hub.delivered_count(), 2);

        // Ending one session does not close the other device's link.
        first.close().await.unwrap();
        assert!(a.receive().await.unwrap().is_none());
        hub.push_inbound("b", Message::new("still-b"));
        b.set_credit(1).await.unwrap();
        let got = b.receive().await.unwrap().unwrap();
        assert_eq!(got.message.body_text(), Some("still-b"));
    }

    #[tokio::test]
    async fn receiver_unknown_address_is_rejected() {
        let hub = MockHub::new();
        let conn = connection(&hub).await;
        let session = conn.open_session().await.unwrap();
        assert!(session.open_receiver("r", "/nowhere").await.is_err());
        assert_eq!(hub.open_link_count(), 0);
    }

    #[tokio::test]
    async fn closing_session_ends_pending_receive() {
        let hub = MockHub::new();
        let conn = connection(&hub).await;
        let session = conn.open_session().await.unwrap();
        let receiver = session
            .open_receiver("r", "/devices/d/messages/deviceBound")
            .await
            .unwrap();
        receiver.set_credit(5).await.unwrap();

        let signal = session.closed();
        hub.close_sessions(Some(ErrorCondition::new("amqp:session:errant-link", "bye")));

        assert!(receiver.receive().await.unwrap().is_none());
        let closed = signal.wait().await;
        assert_eq!(closed.error.unwrap().description.as_deref(), Some("bye"));
        assert_eq!(hub.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn connection_close_cascades_and_counts() {
        let hub = MockHub::new();
        let conn = connection(&hub).await;
        let session = conn.open_session().await.unwrap();
        let conn_signal = conn.closed();
        let session_signal = session.closed();

        conn.close(Duration::from_secs(6)).await.unwrap();

        assert!(conn_signal.wait().await.error.is_none());
        assert!(session_signal.is_closed());
        assert_eq!(hub.connection_closes(), 1);
        assert!(conn.open_session().await.is_err());
    }

    #[tokio::test]
    async fn failing_and_stalled_sends() {
        let hub = MockHub::new();
        let conn = connection(&hub).await;
        let session = conn.open_session().await.unwrap();
        let sender = session.open_sender("s", "/devices/d/messages/events").await.unwrap();

        hub.fail_sends(Some("link detached".into()));
        assert!(matches!(
            sender.send(Message::new("x")).await,
            Err(AmqpError::Send(_))
        ));

        hub.fail_sends(None);
        hub.stall_sends(true);
        let stalled =
            tokio::time::timeout(Duration::from_millis(20), sender.send(Message::new("y"))).await;
        assert!(stalled.is_err());
        assert!(hub.sent().is_empty());
    }
}

//! E2E tests for device-bound messages: fan-out, acceptance and credit.

mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::{RecordingObserver, TestHarness};
use ih_device_agent::{
    Notification, Observer, SessionClosedError, SessionOptions, Subscription,
};
use ih_protocol::Message;

/// A long burst is delivered in order without ever exceeding the credit window.
#[tokio::test]
async fn e2e_credit_window_holds_under_load() {
    let h = TestHarness::new();
    let session = h.connect().await.unwrap();
    let observer = RecordingObserver::new();
    let _sub = session.subscribe(observer.clone());

    for i in 0..20 {
        h.hub.push_inbound(
            "dev1",
            Message::new(format!("command-{i}")).with_subject("command"),
        );
    }
    assert!(h.hub.wait_for_accepted(20, Duration::from_secs(5)).await);

    let expected: Vec<String> = (0..20).map(|i| format!("command-{i}")).collect();
    assert_eq!(observer.bodies(), expected);
    assert!(h.hub.max_unsettled() <= 5);
    assert_eq!(h.hub.delivered_count(), 20);
    assert_eq!(h.hub.pending_inbound("dev1"), 0);
    assert_eq!(h.hub.inbound_credit("dev1"), 5);

    session.close().await;
}

/// Two observers see each message in registration order.
#[tokio::test]
async fn e2e_two_observers_in_registration_order() {
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }
    impl Observer for Tagged {
        fn on_next(&self, message: &Arc<Message>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.tag, message.body_text().unwrap()));
        }
        fn on_error(&self, _error: &SessionClosedError) {}
    }

    let h = TestHarness::new();
    let session = h.connect().await.unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let _first = session.subscribe(Arc::new(Tagged { tag: "first", log: log.clone() }));
    let _second = session.subscribe(Arc::new(Tagged { tag: "second", log: log.clone() }));

    h.hub.push_inbound("dev1", Message::new("reboot"));
    assert!(h.hub.wait_for_accepted(1, Duration::from_secs(5)).await);

    assert_eq!(*log.lock().unwrap(), vec!["first:reboot", "second:reboot"]);
    session.close().await;
}

/// An observer that unsubscribes a peer mid-dispatch does not disturb that dispatch.
#[tokio::test]
async fn e2e_unsubscribe_during_dispatch() {
    struct Unsubscriber {
        target: Mutex<Option<Subscription>>,
    }
    impl Observer for Unsubscriber {
        fn on_next(&self, _message: &Arc<Message>) {
            if let Some(sub) = self.target.lock().unwrap().take() {
                sub.unsubscribe();
            }
        }
        fn on_error(&self, _error: &SessionClosedError) {}
    }

    let h = TestHarness::new();
    let session = h.connect().await.unwrap();

    let unsubscriber = Arc::new(Unsubscriber { target: Mutex::new(None) });
    let _u = session.subscribe(unsubscriber.clone());
    let peer = RecordingObserver::new();
    let peer_sub = session.subscribe(peer.clone());
    *unsubscriber.target.lock().unwrap() = Some(peer_sub);

    h.hub.push_inbound("dev1", Message::new("one"));
    h.hub.push_inbound("dev1", Message::new("two"));
    assert!(h.hub.wait_for_accepted(2, Duration::from_secs(5)).await);

    // The snapshot taken for "one" still reached the peer; "two" did not.
    assert_eq!(peer.bodies(), vec!["one"]);
    assert_eq!(session.broadcaster().subscriber_count(), 1);
    session.close().await;
}

/// Messages are accepted even when nobody is subscribed.
#[tokio::test]
async fn e2e_messages_accepted_without_observers() {
    let h = TestHarness::new();
    let session = h.connect().await.unwrap();

    for i in 0..7 {
        h.hub.push_inbound("dev1", Message::new(format!("{i}")));
    }
    assert!(h.hub.wait_for_accepted(7, Duration::from_secs(5)).await);
    session.close().await;
}

/// The channel subscription delivers application properties untouched.
#[tokio::test]
async fn e2e_channel_subscription_receives_commands() {
    let h = TestHarness::new();
    let session = h.connect().await.unwrap();
    let (_sub, mut rx) = session.subscribe_channel();

    h.hub.push_inbound(
        "dev1",
        Message::new("set-interval")
            .with_subject("command")
            .with_property("interval", 30),
    );

    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
        Some(Notification::Message(m)) => {
            assert_eq!(m.subject(), Some("command"));
            assert_eq!(m.property("interval").unwrap().as_i64(), Some(30));
            assert_eq!(m.body_text(), Some("set-interval"));
        }
        other => panic!("unexpected {other:?}"),
    }
    session.close().await;
}

/// Two devices on one hub each receive only their own device-bound traffic.
#[tokio::test]
async fn e2e_inbound_is_routed_per_device() {
    let h = TestHarness::new();
    let first = h.connect_as("dev1", SessionOptions::default()).await.unwrap();
    let first_observer = RecordingObserver::new();
    let _first_sub = first.subscribe(first_observer.clone());

    let second = h.connect_as("dev2", SessionOptions::default()).await.unwrap();
    let second_observer = RecordingObserver::new();
    let _second_sub = second.subscribe(second_observer.clone());

    for i in 0..3 {
        h.hub.push_inbound("dev1", Message::new(format!("dev1-{i}")));
        h.hub.push_inbound("dev2", Message::new(format!("dev2-{i}")));
    }
    assert!(h.hub.wait_for_accepted(6, Duration::from_secs(5)).await);

    assert_eq!(first_observer.bodies(), vec!["dev1-0", "dev1-1", "dev1-2"]);
    assert_eq!(second_observer.bodies(), vec!["dev2-0", "dev2-1", "dev2-2"]);
    assert_eq!(h.hub.inbound_credit("dev1"), 5);
    assert_eq!(h.hub.inbound_credit("dev2"), 5);

    // Closing one device leaves the other receiving.
    first.close().await;
    h.hub.push_inbound("dev2", Message::new("after"));
    assert!(h.hub.wait_for_accepted(7, Duration::from_secs(5)).await);
    assert_eq!(second_observer.bodies().last().map(String::as_str), Some("after"));
    assert_eq!(first_observer.bodies().len(), 3);

    second.close().await;
}

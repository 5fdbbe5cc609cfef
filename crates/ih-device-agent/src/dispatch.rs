//! Receive loop for the device-bound link.
//!
//! Each delivery is logged, fanned out to the observers, accepted, and only
//! then is the credit window restored, so at most `credit` messages are
//! ever outstanding.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ih_amqp_channel::{Delivery, ReceiverLink};

use crate::broadcaster::MessageBroadcaster;

/// Run until `cancel` fires or the link closes, then close the link.
/// The initial credit is granted by the caller when the link is opened.
pub(crate) async fn run(
    receiver: Box<dyn ReceiverLink>,
    broadcaster: MessageBroadcaster,
    credit: u32,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = receiver.receive() => next,
        };
        match next {
            Ok(Some(delivery)) => {
                handle_delivery(receiver.as_ref(), &broadcaster, delivery, credit).await;
            }
            Ok(None) => {
                debug!("device-bound link closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "device-bound receive failed");
                break;
            }
        }
    }

    if let Err(e) = receiver.close().await {
        debug!(error = %e, "failed to close device-bound link");
    }
}

async fn handle_delivery(
    receiver: &dyn ReceiverLink,
    broadcaster: &MessageBroadcaster,
    delivery: Delivery,
    credit: u32,
) {
    let message = &delivery.message;
    debug!(
        delivery_id = delivery.delivery_id,
        subject = message.subject().unwrap_or(""),
        body = %message.body_base64(),
        "inbound message"
    );

    let observers = broadcaster.notify_next(message.clone());
    debug!(delivery_id = delivery.delivery_id, observers, "inbound message dispatched");

    if let Err(e) = receiver.accept(&delivery).await {
        warn!(delivery_id = delivery.delivery_id, error = %e, "failed to accept inbound message");
    }
    if let Err(e) = receiver.set_credit(credit).await {
        warn!(error = %e, "failed to replenish link credit");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use ih_amqp_channel::{Address, ConnectOptions, MockHub};
    use ih_protocol::Message;

    use crate::broadcaster::{ChannelObserver, Notification};

    async fn receiver(hub: &Arc<MockHub>) -> Box<dyn ReceiverLink> {
        let conn = hub
            .connect(&Address::new("hub", 5671), &ConnectOptions::default())
            .await
            .unwrap();
        let session = conn.open_session().await.unwrap();
        let receiver = session
            .open_receiver("receiver-link", "/devices/dev1/messages/deviceBound")
            .await
            .unwrap();
        // The session handle only needs to outlive the attach.
        drop(session);
        receiver
    }

    #[tokio::test]
    async fn credit_never_exceeds_window() {
        let hub = MockHub::new();
        let link = receiver(&hub).await;
        link.set_credit(5).await.unwrap();

        let broadcaster = MessageBroadcaster::new();
        let (observer, mut rx) = ChannelObserver::new();
        let _sub = broadcaster.subscribe(observer);

        for i in 0..20 {
            hub.push_inbound("dev1", Message::new(format!("m{i}")));
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(link, broadcaster, 5, cancel.clone()));

        assert!(hub.wait_for_accepted(20, Duration::from_secs(5)).await);
        assert_eq!(hub.delivered_count(), 20);
        assert!(hub.max_unsettled() <= 5);
        assert_eq!(hub.pending_inbound("dev1"), 0);

        for i in 0..20 {
            match rx.recv().await.unwrap() {
                Notification::Message(m) => assert_eq!(m.body_text(), Some(format!("m{i}").as_str())),
                other => panic!("unexpected {other:?}"),
            }
        }

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(hub.open_link_count(), 0);
    }

    #[tokio::test]
    async fn messages_are_accepted_without_observers() {
        let hub = MockHub::new();
        let link = receiver(&hub).await;
        link.set_credit(5).await.unwrap();
        hub.push_inbound("dev1", Message::new("nobody listening"));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(link, MessageBroadcaster::new(), 5, cancel.clone()));

        assert!(hub.wait_for_accepted(1, Duration::from_secs(5)).await);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn loop_ends_when_link_closes() {
        let hub = MockHub::new();
        let link = receiver(&hub).await;
        link.set_credit(5).await.unwrap();

        let task = tokio::spawn(run(link, MessageBroadcaster::new(), 5, CancellationToken::new()));
        hub.close_sessions(None);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("dispatch loop did not stop")
            .unwrap();
    }
}

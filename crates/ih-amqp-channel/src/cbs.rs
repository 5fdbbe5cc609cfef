//! Claims-based-security (CBS) token exchange.
//!
//! Each `put_token` call opens a short-lived session with a sender and a
//! receiver on the `$cbs` node, sends one put-token request, waits for the
//! status-coded response, then closes both links and the session on every
//! exit path.

use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use ih_protocol::Message;
use ih_protocol::addresses::{CBS_NODE, CBS_REPLY_TO, CBS_SENDER_NAME};

use crate::config::HubConfig;
use crate::error::{AmqpError, AmqpResult};
use crate::transport::{Connection, ReceiverLink, SenderLink, Session};

/// Token type announced in the put-token request.
pub const CBS_TOKEN_TYPE: &str = "azure-devices.net:sastoken";

/// Operation name of the put-token request.
pub const PUT_TOKEN_OPERATION: &str = "put-token";

/// Result of a put-token exchange that completed at the transport level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbsOutcome {
    /// The hub accepted the token (status 200 or 202).
    Accepted { status_code: i64 },
    /// The hub answered with any other status.
    Rejected {
        status_code: i64,
        description: Option<String>,
    },
    /// The response lacked a required section or status code.
    Malformed(String),
    /// The reply link closed without a response.
    NoResponse,
}

impl CbsOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl std::fmt::Display for CbsOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted { status_code } => write!(f, "accepted ({status_code})"),
            Self::Rejected {
                status_code,
                description,
            } => write!(
                f,
                "rejected ({status_code}): {}",
                description.as_deref().unwrap_or("no description")
            ),
            Self::Malformed(reason) => write!(f, "malformed response: {reason}"),
            Self::NoResponse => f.write_str("no response"),
        }
    }
}

/// Build the put-token request message.
pub fn put_token_request(token: &str, audience: &str) -> Message {
    Message::new(token)
        .with_message_id(Uuid::new_v4().to_string())
        .with_reply_to(CBS_REPLY_TO)
        .with_property("operation", PUT_TOKEN_OPERATION)
        .with_property("type", CBS_TOKEN_TYPE)
        .with_property("name", audience)
}

/// Classify a put-token response.
pub fn evaluate_response(response: &Message) -> CbsOutcome {
    if response.properties.is_none() {
        return CbsOutcome::Malformed("missing properties".into());
    }
    let Some(app) = response.application_properties.as_ref() else {
        return CbsOutcome::Malformed("missing application properties".into());
    };
    let Some(status_code) = app.get("status-code").and_then(|v| v.as_i64()) else {
        return CbsOutcome::Malformed("missing status-code".into());
    };
    let description = app
        .get("status-description")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match status_code {
        200 | 202 => CbsOutcome::Accepted { status_code },
        _ => CbsOutcome::Rejected {
            status_code,
            description,
        },
    }
}

/// Performs put-token exchanges against the `$cbs` node.
#[derive(Debug, Clone)]
pub struct CbsAuthenticator {
    timeout: Duration,
}

impl CbsAuthenticator {
    /// `timeout` bounds the request/response round trip.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.auth_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Put `token` for `audience` on `connection`.
    ///
    /// `Err` is reserved for transport failures and timeouts; every response
    /// the hub sends back, good or bad, is an `Ok(CbsOutcome)`.
    pub async fn put_token(
        &self,
        connection: &dyn Connection,
        token: &str,
        audience: &str,
    ) -> AmqpResult<CbsOutcome> {
        debug!(audience, "sending authentication token");
        let session = connection.open_session().await?;

        let result = self.exchange(session.as_ref(), token, audience).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close CBS session");
        }

        match &result {
            Ok(CbsOutcome::Accepted { .. }) => debug!(audience, "authentication complete"),
            Ok(CbsOutcome::Rejected { description, .. }) => error!(
                audience,
                status = description.as_deref().unwrap_or("no description"),
                "authentication failure"
            ),
            Ok(outcome) => error!(audience, %outcome, "authentication failure"),
            Err(e) => error!(audience, error = %e, "authentication exchange failed"),
        }
        result
    }

    async fn exchange(
        &self,
        session: &dyn Session,
        token: &str,
        audience: &str,
    ) -> AmqpResult<CbsOutcome> {
        let sender = session.open_sender(CBS_SENDER_NAME, CBS_NODE).await?;
        let receiver = match session.open_receiver(CBS_REPLY_TO, CBS_NODE).await {
            Ok(receiver) => receiver,
            Err(e) => {
                close_sender(sender.as_ref()).await;
                return Err(e);
            }
        };

        let request = put_token_request(token, audience);
        let result = match tokio::time::timeout(
            self.timeout,
            round_trip(sender.as_ref(), receiver.as_ref(), request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AmqpError::Timeout {
                operation: "put-token",
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        close_sender(sender.as_ref()).await;
        if let Err(e) = receiver.close().await {
            warn!(error = %e, "failed to close CBS receiver");
        }
        result
    }
}

async fn round_trip(
    sender: &dyn SenderLink,
    receiver: &dyn ReceiverLink,
    request: Message,
) -> AmqpResult<CbsOutcome> {
    receiver.set_credit(1).await?;
    sender.send(request).await?;

    let Some(delivery) = receiver.receive().await? else {
        return Ok(CbsOutcome::NoResponse);
    };
    if let Err(e) = receiver.accept(&delivery).await {
        warn!(error = %e, "failed to accept CBS response");
    }
    Ok(evaluate_response(&delivery.message))
}

async fn close_sender(sender: &dyn SenderLink) {
    if let Err(e) = sender.close().await {
        warn!(error = %e, "failed to close CBS sender");
    }
}

// 11.0: events pushed to account holders. the risk loops emit them, a Notifier delivers them.
// delivery is fire-and-forget: notify_logged swallows failures after logging them.

use crate::types::{AccountId, Amount, InstrumentId, Price, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub account_id: AccountId,
    pub timestamp: Timestamp,
    pub payload: AccountEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    MarginCallRaised(MarginCallEvent),
    MarginCallCleared(MarginCallEvent),
    StoppedOut(StopOutEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginCallEvent {
    pub available: Amount,
    pub blocked: Amount,
    pub total: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOutEvent {
    pub instrument_id: InstrumentId,
    pub ticker: String,
    pub units: u64,
    pub price: Price,
    pub available_after: Amount,
}

impl AccountEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AccountEvent::MarginCallRaised(_) => "margin_call_raised",
            AccountEvent::MarginCallCleared(_) => "margin_call_cleared",
            AccountEvent::StoppedOut(_) => "stopped_out",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Recipient {0} unreachable")]
    Unreachable(AccountId),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: Event) -> Result<(), NotifyError>;
}

/// Deliver an event, logging instead of propagating a failure.
pub async fn notify_logged(notifier: &dyn Notifier, account_id: AccountId, payload: AccountEvent) {
    let name = payload.name();
    let event = Event {
        account_id,
        timestamp: Timestamp::now(),
        payload,
    };
    if let Err(e) = notifier.notify(event).await {
        tracing::warn!(account_id = %account_id, event = name, error = %e, "Notification failed");
    }
}

/// Notifier that only writes to the log. Used when no delivery channel is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: Event) -> Result<(), NotifyError> {
        tracing::info!(
            account_id = %event.account_id,
            event = event.payload.name(),
            payload = ?event.payload,
            "Account notification"
        );
        Ok(())
    }
}

//! Notification port. Delivery is fire-and-forget.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::risk::ChargebackStatus;
use crate::domain::subscription::CancellationReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    SubscriptionActivated { subscription_id: SubscriptionId },
    RenewalSucceeded { subscription_id: SubscriptionId },
    RenewalFailed {
        subscription_id: SubscriptionId,
        attempt: u32,
        next_retry_at: Timestamp,
    },
    SubscriptionCancelled {
        subscription_id: SubscriptionId,
        reason: CancellationReason,
    },
    /// Money arrived for a subscription that was already cancelled.
    PaymentAfterCancellation { subscription_id: SubscriptionId },
    PayoutPaid { amount: i64 },
    PayoutFailed { amount: i64 },
    WalletFrozen,
    ChargebackResolved { status: ChargebackStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: UserId,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(recipient: UserId, kind: NotificationKind) -> Self {
        Self { recipient, kind }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), DomainError>;
}

/// Sends each notification, logging failures instead of returning them.
pub async fn dispatch_all(notifier: &dyn Notifier, notifications: Vec<Notification>) {
    for notification in notifications {
        let recipient = notification.recipient.clone();
        if let Err(err) = notifier.notify(notification).await {
            tracing::warn!(recipient = %recipient, error = %err, "notification dispatch failed");
        }
    }
}

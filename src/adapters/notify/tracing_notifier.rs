//! Default notifier: emits each notification as a structured log line.
//!
//! Email and SMS delivery live outside this service; a log shipper can
//! forward these records to them.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::ports::{Notification, NotificationKind, Notifier};

#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), DomainError> {
        let recipient = notification.recipient;
        match notification.kind {
            NotificationKind::SubscriptionActivated { subscription_id } => {
                tracing::info!(recipient = %recipient, subscription_id = %subscription_id, "notify: subscription activated");
            }
            NotificationKind::RenewalSucceeded { subscription_id } => {
                tracing::info!(recipient = %recipient, subscription_id = %subscription_id, "notify: renewal succeeded");
            }
            NotificationKind::RenewalFailed {
                subscription_id,
                attempt,
                next_retry_at,
            } => {
                tracing::info!(
                    recipient = %recipient,
                    subscription_id = %subscription_id,
                    attempt,
                    next_retry_at = %next_retry_at,
                    "notify: renewal failed"
                );
            }
            NotificationKind::SubscriptionCancelled {
                subscription_id,
                reason,
            } => {
                tracing::info!(
                    recipient = %recipient,
                    subscription_id = %subscription_id,
                    reason = reason.as_str(),
                    "notify: subscription cancelled"
                );
            }
            NotificationKind::PaymentAfterCancellation { subscription_id } => {
                tracing::info!(recipient = %recipient, subscription_id = %subscription_id, "notify: payment received after cancellation");
            }
            NotificationKind::PayoutPaid { amount } => {
                tracing::info!(recipient = %recipient, amount, "notify: payout paid");
            }
            NotificationKind::PayoutFailed { amount } => {
                tracing::info!(recipient = %recipient, amount, "notify: payout failed");
            }
            NotificationKind::WalletFrozen => {
                tracing::info!(recipient = %recipient, "notify: wallet frozen");
            }
            NotificationKind::ChargebackResolved { status } => {
                tracing::info!(recipient = %recipient, status = ?status, "notify: chargeback resolved");
            }
        }
        Ok(())
    }
}

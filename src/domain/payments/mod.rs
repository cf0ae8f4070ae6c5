//! Payments domain - providers, canonical events, payments, and fees.

mod canonical;
mod errors;
mod event;
mod fees;
mod payment;
mod provider;

pub use canonical::{CanonicalEvent, CanonicalEventType, CanonicalStatus, PAYMENT_METHOD_TOKEN_KEY};
pub use errors::BillingError;
pub use event::PaymentEvent;
pub use fees::FeeSchedule;
pub use payment::{NewPayment, Payment, PaymentPurpose, PaymentStatus};
pub use provider::{
    select_enabled_provider, select_payout_provider, select_provider, ProviderKind,
    ProviderSelection,
};

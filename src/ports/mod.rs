//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the billing services and the outside world. Adapters implement these.
//!
//! - `PaymentGateway` - one payment provider (signature, normalize, API calls)
//! - `PaymentRouter` - normalized entry point across all providers
//! - `BillingStore` / `BillingTransaction` - transactional persistence
//! - `Notifier` - fire-and-forget notifications
//! - `SessionValidator` - bearer token validation

mod billing_store;
mod notifier;
mod payment_gateway;
mod payment_router;
mod session_validator;

pub use billing_store::{BillingStore, BillingTransaction, SaveResult};
pub use notifier::{dispatch_all, Notification, NotificationKind, Notifier};
pub use payment_gateway::{
    ChargeRequest, ChargeResult, GatewayError, PaymentGateway, PayoutRequest, PayoutResult,
};
pub use payment_router::PaymentRouter;
pub use session_validator::SessionValidator;

//! Application layer - billing services.
//!
//! Services orchestrate domain operations and coordinate between ports.
//! Every state change runs in one `BillingTransaction`; provider calls
//! happen outside transactions; notifications go out after commit.

mod checkout;
mod dunning_engine;
mod ledger_service;
mod renewal_charge;
mod risk_engine;
mod settings;
mod subscription_lifecycle;
mod webhook_processor;

pub use checkout::{CheckoutService, CheckoutSession, StartCheckoutCommand};
pub use dunning_engine::{DunningEngine, DunningSweepReport};
pub use ledger_service::LedgerService;
pub use risk_engine::{OpenChargeback, RiskEngine};
pub use settings::BillingSettings;
pub use subscription_lifecycle::{RenewalScanReport, SubscriptionLifecycleManager};
pub use webhook_processor::{ProcessOutcome, WebhookEventProcessor};

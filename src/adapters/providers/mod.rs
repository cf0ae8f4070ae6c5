//! Payment provider adapters and the router that fronts them.

mod common;
mod flutterwave;
mod mock;
mod mpesa;
mod paystack;
mod router;
mod stripe;

pub use flutterwave::FlutterwaveGateway;
pub use mock::{MockGateway, MOCK_SIGNATURE_HEADER};
pub use mpesa::MpesaGateway;
pub use paystack::PaystackGateway;
pub use router::ProviderRouter;
pub use stripe::StripeGateway;

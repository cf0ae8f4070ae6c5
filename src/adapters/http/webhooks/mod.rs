//! Provider webhook ingress.
//!
//! - `POST /webhooks/{provider}` - verify, normalize, and apply one delivery
//!
//! No bearer auth: deliveries are authenticated by the provider signature.

mod handlers;
mod routes;

pub use handlers::{receive_webhook, WebhookAck};
pub use routes::webhook_routes;

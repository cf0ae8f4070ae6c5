//! Scheduler-triggered jobs.
//!
//! - `POST /jobs/renewal-scan` - charge due renewals, close expired rows
//! - `POST /jobs/dunning-sweep` - retry due dunning attempts
//!
//! Both require `X-Job-Secret` and are safe to run concurrently.

mod handlers;
mod routes;

pub use handlers::{dunning_sweep, renewal_scan};
pub use routes::job_routes;

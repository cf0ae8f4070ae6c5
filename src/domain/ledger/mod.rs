//! Ledger domain - creator wallets and payouts.

mod payout;
mod wallet;

pub use payout::{Payout, PayoutStatus};
pub use wallet::CreatorWallet;

//! Creator Billing - payment and subscription lifecycle engine
//!
//! Fans pay creators through Stripe, Paystack, Flutterwave, or M-Pesa.
//! This crate turns provider webhooks into subscription, dunning, wallet,
//! and risk state with exactly-once money movement.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

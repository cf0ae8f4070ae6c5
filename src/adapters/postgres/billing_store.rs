//! PostgreSQL implementation of `BillingStore`.
//!
//! Each `begin` opens a database transaction. Reads ending in `_for_update`
//! take row locks (`FOR UPDATE`); the event log relies on its primary key
//! with `ON CONFLICT DO NOTHING`; claims are conditional `UPDATE`s so only
//! one runner's statement matches. Wallet rows are created with
//! `ON CONFLICT DO NOTHING` before being locked, so a first credit never
//! races another transaction's insert.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::dunning::DunningAttempt;
use crate::domain::foundation::{
    ChargebackId, Currency, DomainError, DunningAttemptId, ErrorCode, PaymentId, PayoutId,
    SubscriptionId, Timestamp, UserId,
};
use crate::domain::ledger::{CreatorWallet, Payout};
use crate::domain::payments::{FeeSchedule, Payment, PaymentEvent, PaymentPurpose, ProviderKind};
use crate::domain::risk::{AmlRiskProfile, Chargeback, CreatorAccount, RiskInputs};
use crate::domain::subscription::Subscription;
use crate::ports::{BillingStore, BillingTransaction, SaveResult};

/// PostgreSQL-backed billing store.
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

fn db_error(action: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, e))
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

fn parse_column<T>(column: &str, raw: &str) -> Result<T, DomainError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid {} value '{}': {}", column, raw, e),
        )
    })
}

fn user_id(column: &str, raw: String) -> Result<UserId, DomainError> {
    UserId::new(raw).map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Invalid {}: {}", column, e))
    })
}

fn ts(dt: DateTime<Utc>) -> Timestamp {
    Timestamp::from_datetime(dt)
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<Timestamp> {
    dt.map(Timestamp::from_datetime)
}

fn opt_dt(t: Option<Timestamp>) -> Option<DateTime<Utc>> {
    t.map(Timestamp::into_datetime)
}

// ════════════════════════════════════════════════════════════════════════════════
// Row types
// ════════════════════════════════════════════════════════════════════════════════

const PAYMENT_COLUMNS: &str = "id, payer_id, creator_id, amount, currency, provider, reference, \
     provider_reference, status, tier_name, purpose, subscription_id, metadata, \
     webhook_received, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    payer_id: String,
    creator_id: String,
    amount: i64,
    currency: String,
    provider: String,
    reference: String,
    provider_reference: Option<String>,
    status: String,
    tier_name: String,
    purpose: String,
    subscription_id: Option<Uuid>,
    metadata: Json<BTreeMap<String, String>>,
    webhook_received: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.id),
            payer_id: user_id("payer_id", row.payer_id)?,
            creator_id: user_id("creator_id", row.creator_id)?,
            amount: row.amount,
            currency: parse_column("currency", &row.currency)?,
            provider: parse_column("provider", &row.provider)?,
            reference: row.reference,
            provider_reference: row.provider_reference,
            status: parse_column("payment status", &row.status)?,
            tier_name: row.tier_name,
            purpose: parse_column("purpose", &row.purpose)?,
            subscription_id: row.subscription_id.map(SubscriptionId::from_uuid),
            metadata: row.metadata.0,
            webhook_received: row.webhook_received,
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, fan_id, creator_id, tier_name, tier_price, currency, \
     status, start_date, end_date, payment_provider, payment_reference, payment_method_token, \
     auto_renew, cancellation_reason, cancelled_at, renewal_claimed_until, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    fan_id: String,
    creator_id: String,
    tier_name: String,
    tier_price: i64,
    currency: String,
    status: String,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    payment_provider: String,
    payment_reference: String,
    payment_method_token: Option<String>,
    auto_renew: bool,
    cancellation_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    renewal_claimed_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            fan_id: user_id("fan_id", row.fan_id)?,
            creator_id: user_id("creator_id", row.creator_id)?,
            tier_name: row.tier_name,
            tier_price: row.tier_price,
            currency: parse_column("currency", &row.currency)?,
            status: parse_column("subscription status", &row.status)?,
            start_date: opt_ts(row.start_date),
            end_date: opt_ts(row.end_date),
            payment_provider: parse_column("payment_provider", &row.payment_provider)?,
            payment_reference: row.payment_reference,
            payment_method_token: row.payment_method_token,
            auto_renew: row.auto_renew,
            cancellation_reason: row
                .cancellation_reason
                .as_deref()
                .map(|raw| parse_column("cancellation_reason", raw))
                .transpose()?,
            cancelled_at: opt_ts(row.cancelled_at),
            renewal_claimed_until: opt_ts(row.renewal_claimed_until),
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
        })
    }
}

const DUNNING_COLUMNS: &str = "id, subscription_id, attempt_number, scheduled_at, outcome, \
     payment_reference, claimed_until, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct DunningRow {
    id: Uuid,
    subscription_id: Uuid,
    attempt_number: i32,
    scheduled_at: DateTime<Utc>,
    outcome: String,
    payment_reference: Option<String>,
    claimed_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DunningRow> for DunningAttempt {
    type Error = DomainError;

    fn try_from(row: DunningRow) -> Result<Self, Self::Error> {
        Ok(DunningAttempt {
            id: DunningAttemptId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            attempt_number: u32::try_from(row.attempt_number).map_err(|_| {
                DomainError::new(ErrorCode::DatabaseError, "Negative attempt_number")
            })?,
            scheduled_at: ts(row.scheduled_at),
            outcome: parse_column("dunning outcome", &row.outcome)?,
            payment_reference: row.payment_reference,
            claimed_until: opt_ts(row.claimed_until),
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    creator_id: String,
    currency: String,
    balance: i64,
    pending_payouts: i64,
    frozen: bool,
    frozen_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WalletRow> for CreatorWallet {
    type Error = DomainError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        Ok(CreatorWallet {
            creator_id: user_id("creator_id", row.creator_id)?,
            currency: parse_column("currency", &row.currency)?,
            balance: row.balance,
            pending_payouts: row.pending_payouts,
            frozen: row.frozen,
            frozen_reason: row.frozen_reason,
            updated_at: ts(row.updated_at),
        })
    }
}

const PAYOUT_COLUMNS: &str = "id, creator_id, amount, currency, destination, provider, status, \
     provider_reference, failure_reason, approved_by, requested_at, processed_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct PayoutRow {
    id: Uuid,
    creator_id: String,
    amount: i64,
    currency: String,
    destination: String,
    provider: String,
    status: String,
    provider_reference: Option<String>,
    failure_reason: Option<String>,
    approved_by: Option<String>,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PayoutRow> for Payout {
    type Error = DomainError;

    fn try_from(row: PayoutRow) -> Result<Self, Self::Error> {
        Ok(Payout {
            id: PayoutId::from_uuid(row.id),
            creator_id: user_id("creator_id", row.creator_id)?,
            amount: row.amount,
            currency: parse_column("currency", &row.currency)?,
            destination: row.destination,
            provider: parse_column("provider", &row.provider)?,
            status: parse_column("payout status", &row.status)?,
            provider_reference: row.provider_reference,
            failure_reason: row.failure_reason,
            approved_by: row
                .approved_by
                .map(|raw| user_id("approved_by", raw))
                .transpose()?,
            requested_at: ts(row.requested_at),
            processed_at: opt_ts(row.processed_at),
            updated_at: ts(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChargebackRow {
    id: Uuid,
    user_id: String,
    creator_id: String,
    payment_reference: String,
    amount: i64,
    currency: String,
    status: String,
    reason: Option<String>,
    opened_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
}

impl TryFrom<ChargebackRow> for Chargeback {
    type Error = DomainError;

    fn try_from(row: ChargebackRow) -> Result<Self, Self::Error> {
        Ok(Chargeback {
            id: ChargebackId::from_uuid(row.id),
            user_id: user_id("user_id", row.user_id)?,
            creator_id: user_id("creator_id", row.creator_id)?,
            payment_reference: row.payment_reference,
            amount: row.amount,
            currency: parse_column("currency", &row.currency)?,
            status: parse_column("chargeback status", &row.status)?,
            reason: row.reason,
            opened_at: ts(row.opened_at),
            resolved_at: opt_ts(row.resolved_at),
            resolved_by: row
                .resolved_by
                .map(|raw| user_id("resolved_by", raw))
                .transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RiskProfileRow {
    creator_id: String,
    risk_score: i16,
    daily_limit: i64,
    monthly_limit: i64,
    flags: Vec<String>,
    last_risk_update: DateTime<Utc>,
}

impl TryFrom<RiskProfileRow> for AmlRiskProfile {
    type Error = DomainError;

    fn try_from(row: RiskProfileRow) -> Result<Self, Self::Error> {
        Ok(AmlRiskProfile {
            creator_id: user_id("creator_id", row.creator_id)?,
            risk_score: u8::try_from(row.risk_score).map_err(|_| {
                DomainError::new(ErrorCode::DatabaseError, "risk_score out of range")
            })?,
            daily_limit: row.daily_limit,
            monthly_limit: row.monthly_limit,
            flags: row
                .flags
                .iter()
                .map(|raw| parse_column("risk flag", raw))
                .collect::<Result<_, _>>()?,
            last_risk_update: ts(row.last_risk_update),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    creator_id: String,
    kyc_status: String,
    created_at: DateTime<Utc>,
    kyc_approved_at: Option<DateTime<Utc>>,
}

impl TryFrom<AccountRow> for CreatorAccount {
    type Error = DomainError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(CreatorAccount {
            creator_id: user_id("creator_id", row.creator_id)?,
            kyc_status: parse_column("kyc_status", &row.kyc_status)?,
            created_at: ts(row.created_at),
            kyc_approved_at: opt_ts(row.kyc_approved_at),
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Transaction
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl BillingTransaction for PostgresTransaction {
    // ─── Payment event log ───────────────────────────────────────────

    async fn payment_event_exists(&mut self, event_id: &str) -> Result<bool, DomainError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM payment_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error("check payment event"))
    }

    async fn append_payment_event(&mut self, event: &PaymentEvent) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (
                event_id, provider, event_type, event, reference, amount, currency,
                status, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(event.provider.as_str())
        .bind(event.event_type.as_str())
        .bind(&event.event)
        .bind(&event.reference)
        .bind(event.amount)
        .bind(event.currency.as_str())
        .bind(event.status.as_str())
        .bind(Json(&event.metadata))
        .bind(event.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("append payment event"))?;

        Ok(if result.rows_affected() == 0 {
            SaveResult::AlreadyExists
        } else {
            SaveResult::Inserted
        })
    }

    // ─── Payments ────────────────────────────────────────────────────

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, payer_id, creator_id, amount, currency, provider, reference,
                provider_reference, status, tier_name, purpose, subscription_id, metadata,
                webhook_received, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.payer_id.as_str())
        .bind(payment.creator_id.as_str())
        .bind(payment.amount)
        .bind(payment.currency.as_str())
        .bind(payment.provider.as_str())
        .bind(&payment.reference)
        .bind(&payment.provider_reference)
        .bind(payment.status.as_str())
        .bind(&payment.tier_name)
        .bind(payment.purpose.as_str())
        .bind(payment.subscription_id.map(|id| *id.as_uuid()))
        .bind(Json(&payment.metadata))
        .bind(payment.webhook_received)
        .bind(payment.created_at.as_datetime())
        .bind(payment.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, "payments_provider_reference_key") {
                return DomainError::new(
                    ErrorCode::DuplicateReference,
                    format!("payment reference {} already exists", payment.reference),
                );
            }
            db_error("insert payment")(e)
        })?;
        Ok(())
    }

    async fn find_payment_for_update(
        &mut self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Payment>, DomainError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE provider = $1 AND (reference = $2 OR provider_reference = $2) \
             ORDER BY (reference = $2) DESC \
             LIMIT 1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(provider.as_str())
            .bind(reference)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find payment"))?;
        row.map(Payment::try_from).transpose()
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                provider_reference = $2,
                status = $3,
                metadata = $4,
                webhook_received = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(&payment.provider_reference)
        .bind(payment.status.as_str())
        .bind(Json(&payment.metadata))
        .bind(payment.webhook_received)
        .bind(payment.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update payment"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(ErrorCode::PaymentNotFound, "payment does not exist"));
        }
        Ok(())
    }

    async fn find_pending_payment(
        &mut self,
        subscription_id: SubscriptionId,
        purpose: PaymentPurpose,
    ) -> Result<Option<Payment>, DomainError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE subscription_id = $1 AND purpose = $2 AND status = 'pending' \
             ORDER BY created_at DESC \
             LIMIT 1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(subscription_id.as_uuid())
            .bind(purpose.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find pending payment"))?;
        row.map(Payment::try_from).transpose()
    }

    // ─── Subscriptions ───────────────────────────────────────────────

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, fan_id, creator_id, tier_name, tier_price, currency, status,
                start_date, end_date, payment_provider, payment_reference,
                payment_method_token, auto_renew, cancellation_reason, cancelled_at,
                renewal_claimed_until, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.fan_id.as_str())
        .bind(subscription.creator_id.as_str())
        .bind(&subscription.tier_name)
        .bind(subscription.tier_price)
        .bind(subscription.currency.as_str())
        .bind(subscription.status.as_str())
        .bind(opt_dt(subscription.start_date))
        .bind(opt_dt(subscription.end_date))
        .bind(subscription.payment_provider.as_str())
        .bind(&subscription.payment_reference)
        .bind(&subscription.payment_method_token)
        .bind(subscription.auto_renew)
        .bind(subscription.cancellation_reason.map(|r| r.as_str()))
        .bind(opt_dt(subscription.cancelled_at))
        .bind(opt_dt(subscription.renewal_claimed_until))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("insert subscription"))?;
        Ok(())
    }

    async fn find_subscription_for_update(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find subscription"))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                start_date = $3,
                end_date = $4,
                payment_reference = $5,
                payment_method_token = $6,
                auto_renew = $7,
                cancellation_reason = $8,
                cancelled_at = $9,
                renewal_claimed_until = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(opt_dt(subscription.start_date))
        .bind(opt_dt(subscription.end_date))
        .bind(&subscription.payment_reference)
        .bind(&subscription.payment_method_token)
        .bind(subscription.auto_renew)
        .bind(subscription.cancellation_reason.map(|r| r.as_str()))
        .bind(opt_dt(subscription.cancelled_at))
        .bind(opt_dt(subscription.renewal_claimed_until))
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update subscription"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                "subscription does not exist",
            ));
        }
        Ok(())
    }

    async fn find_active_subscription(
        &mut self,
        fan_id: &UserId,
        creator_id: &UserId,
        tier_name: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions \
             WHERE fan_id = $1 AND creator_id = $2 AND tier_name = $3 AND status = 'active' \
             FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(fan_id.as_str())
            .bind(creator_id.as_str())
            .bind(tier_name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find active subscription"))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn list_due_for_renewal(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT s.id FROM subscriptions s
            WHERE s.status = 'active'
              AND s.auto_renew
              AND s.end_date <= $1
              AND (s.renewal_claimed_until IS NULL OR s.renewal_claimed_until <= $1)
              AND NOT EXISTS (
                  SELECT 1 FROM dunning_attempts d
                  WHERE d.subscription_id = s.id AND d.outcome = 'pending'
              )
            ORDER BY s.end_date
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("list due subscriptions"))?;
        Ok(ids.into_iter().map(SubscriptionId::from_uuid).collect())
    }

    async fn list_expired(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM subscriptions
            WHERE status = 'active' AND NOT auto_renew AND end_date < $1
            ORDER BY end_date
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("list expired subscriptions"))?;
        Ok(ids.into_iter().map(SubscriptionId::from_uuid).collect())
    }

    async fn list_stale_checkouts(
        &mut self,
        cutoff: Timestamp,
        limit: u32,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM subscriptions
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(cutoff.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("list stale checkouts"))?;
        Ok(ids.into_iter().map(SubscriptionId::from_uuid).collect())
    }

    async fn claim_subscription_for_renewal(
        &mut self,
        id: SubscriptionId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions s SET renewal_claimed_until = $3, updated_at = $2
            WHERE s.id = $1
              AND s.status = 'active'
              AND s.auto_renew
              AND s.end_date <= $2
              AND (s.renewal_claimed_until IS NULL OR s.renewal_claimed_until <= $2)
              AND NOT EXISTS (
                  SELECT 1 FROM dunning_attempts d
                  WHERE d.subscription_id = s.id AND d.outcome = 'pending'
              )
            "#,
        )
        .bind(id.as_uuid())
        .bind(now.as_datetime())
        .bind(until.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("claim subscription"))?;
        Ok(result.rows_affected() == 1)
    }

    // ─── Dunning ─────────────────────────────────────────────────────

    async fn insert_dunning_attempt(&mut self, attempt: &DunningAttempt) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO dunning_attempts (
                id, subscription_id, attempt_number, scheduled_at, outcome,
                payment_reference, claimed_until, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.subscription_id.as_uuid())
        .bind(attempt.attempt_number as i32)
        .bind(attempt.scheduled_at.as_datetime())
        .bind(attempt.outcome.as_str())
        .bind(&attempt.payment_reference)
        .bind(opt_dt(attempt.claimed_until))
        .bind(attempt.created_at.as_datetime())
        .bind(attempt.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("insert dunning attempt"))?;
        Ok(())
    }

    async fn update_dunning_attempt(&mut self, attempt: &DunningAttempt) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE dunning_attempts SET
                outcome = $2,
                payment_reference = $3,
                claimed_until = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.outcome.as_str())
        .bind(&attempt.payment_reference)
        .bind(opt_dt(attempt.claimed_until))
        .bind(attempt.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update dunning attempt"))?;
        Ok(())
    }

    async fn find_open_dunning_attempt(
        &mut self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<DunningAttempt>, DomainError> {
        let sql = format!(
            "SELECT {} FROM dunning_attempts \
             WHERE subscription_id = $1 AND outcome = 'pending' \
             ORDER BY attempt_number DESC \
             LIMIT 1 FOR UPDATE",
            DUNNING_COLUMNS
        );
        let row: Option<DunningRow> = sqlx::query_as(&sql)
            .bind(subscription_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find open dunning attempt"))?;
        row.map(DunningAttempt::try_from).transpose()
    }

    async fn list_due_dunning_attempts(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<DunningAttemptId>, DomainError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM dunning_attempts
            WHERE outcome = 'pending'
              AND scheduled_at <= $1
              AND (claimed_until IS NULL OR claimed_until <= $1)
            ORDER BY scheduled_at
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("list due dunning attempts"))?;
        Ok(ids.into_iter().map(DunningAttemptId::from_uuid).collect())
    }

    async fn claim_dunning_attempt(
        &mut self,
        id: DunningAttemptId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<DunningAttempt>, DomainError> {
        let sql = format!(
            "UPDATE dunning_attempts SET claimed_until = $3, updated_at = $2 \
             WHERE id = $1 \
               AND outcome = 'pending' \
               AND scheduled_at <= $2 \
               AND (claimed_until IS NULL OR claimed_until <= $2) \
             RETURNING {}",
            DUNNING_COLUMNS
        );
        let row: Option<DunningRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .bind(now.as_datetime())
            .bind(until.as_datetime())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("claim dunning attempt"))?;
        row.map(DunningAttempt::try_from).transpose()
    }

    // ─── Wallets ─────────────────────────────────────────────────────

    async fn find_wallet_for_update(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
    ) -> Result<Option<CreatorWallet>, DomainError> {
        let row: Option<WalletRow> = sqlx::query_as(
            r#"
            SELECT creator_id, currency, balance, pending_payouts, frozen, frozen_reason, updated_at
            FROM creator_wallets
            WHERE creator_id = $1 AND currency = $2
            FOR UPDATE
            "#,
        )
        .bind(creator_id.as_str())
        .bind(currency.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("find wallet"))?;
        row.map(CreatorWallet::try_from).transpose()
    }

    async fn ensure_wallet_for_update(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
        now: Timestamp,
    ) -> Result<CreatorWallet, DomainError> {
        // Blocks on the primary key while another transaction holds an
        // uncommitted insert of the same row.
        sqlx::query(
            r#"
            INSERT INTO creator_wallets (
                creator_id, currency, balance, pending_payouts, frozen, frozen_reason, updated_at
            ) VALUES ($1, $2, 0, 0, FALSE, NULL, $3)
            ON CONFLICT (creator_id, currency) DO NOTHING
            "#,
        )
        .bind(creator_id.as_str())
        .bind(currency.as_str())
        .bind(now.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("create wallet"))?;

        self.find_wallet_for_update(creator_id, currency)
            .await?
            .ok_or_else(|| DomainError::new(ErrorCode::WalletNotFound, "Wallet vanished after insert"))
    }

    async fn list_wallets_for_update(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Vec<CreatorWallet>, DomainError> {
        let rows: Vec<WalletRow> = sqlx::query_as(
            r#"
            SELECT creator_id, currency, balance, pending_payouts, frozen, frozen_reason, updated_at
            FROM creator_wallets
            WHERE creator_id = $1
            ORDER BY currency
            FOR UPDATE
            "#,
        )
        .bind(creator_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("list wallets"))?;
        rows.into_iter().map(CreatorWallet::try_from).collect()
    }

    async fn save_wallet(&mut self, wallet: &CreatorWallet) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE creator_wallets SET
                balance = $3,
                pending_payouts = $4,
                frozen = $5,
                frozen_reason = $6,
                updated_at = $7
            WHERE creator_id = $1 AND currency = $2
            "#,
        )
        .bind(wallet.creator_id.as_str())
        .bind(wallet.currency.as_str())
        .bind(wallet.balance)
        .bind(wallet.pending_payouts)
        .bind(wallet.frozen)
        .bind(&wallet.frozen_reason)
        .bind(wallet.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("save wallet"))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::WalletNotFound,
                format!("Wallet {}/{} does not exist", wallet.creator_id, wallet.currency),
            ));
        }
        Ok(())
    }

    // ─── Payouts ─────────────────────────────────────────────────────

    async fn insert_payout(&mut self, payout: &Payout) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO payouts (
                id, creator_id, amount, currency, destination, provider, status,
                provider_reference, failure_reason, approved_by, requested_at,
                processed_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(payout.id.as_uuid())
        .bind(payout.creator_id.as_str())
        .bind(payout.amount)
        .bind(payout.currency.as_str())
        .bind(&payout.destination)
        .bind(payout.provider.as_str())
        .bind(payout.status.as_str())
        .bind(&payout.provider_reference)
        .bind(&payout.failure_reason)
        .bind(payout.approved_by.as_ref().map(UserId::as_str))
        .bind(payout.requested_at.as_datetime())
        .bind(opt_dt(payout.processed_at))
        .bind(payout.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("insert payout"))?;
        Ok(())
    }

    async fn update_payout(&mut self, payout: &Payout) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payouts SET
                status = $2,
                provider_reference = $3,
                failure_reason = $4,
                approved_by = $5,
                processed_at = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(payout.id.as_uuid())
        .bind(payout.status.as_str())
        .bind(&payout.provider_reference)
        .bind(&payout.failure_reason)
        .bind(payout.approved_by.as_ref().map(UserId::as_str))
        .bind(opt_dt(payout.processed_at))
        .bind(payout.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update payout"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(ErrorCode::PayoutNotFound, "payout does not exist"));
        }
        Ok(())
    }

    async fn find_payout_for_update(&mut self, id: PayoutId) -> Result<Option<Payout>, DomainError> {
        let sql = format!("SELECT {} FROM payouts WHERE id = $1 FOR UPDATE", PAYOUT_COLUMNS);
        let row: Option<PayoutRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find payout"))?;
        row.map(Payout::try_from).transpose()
    }

    async fn sum_payouts_since(
        &mut self,
        creator_id: &UserId,
        currency: &Currency,
        since: Timestamp,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payouts
            WHERE creator_id = $1 AND currency = $2 AND status <> 'failed' AND requested_at >= $3
            "#,
        )
        .bind(creator_id.as_str())
        .bind(currency.as_str())
        .bind(since.as_datetime())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error("sum payouts"))
    }

    // ─── Chargebacks ─────────────────────────────────────────────────

    async fn insert_chargeback(&mut self, chargeback: &Chargeback) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO chargebacks (
                id, user_id, creator_id, payment_reference, amount, currency, status,
                reason, opened_at, resolved_at, resolved_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(chargeback.id.as_uuid())
        .bind(chargeback.user_id.as_str())
        .bind(chargeback.creator_id.as_str())
        .bind(&chargeback.payment_reference)
        .bind(chargeback.amount)
        .bind(chargeback.currency.as_str())
        .bind(chargeback.status.as_str())
        .bind(&chargeback.reason)
        .bind(chargeback.opened_at.as_datetime())
        .bind(opt_dt(chargeback.resolved_at))
        .bind(chargeback.resolved_by.as_ref().map(UserId::as_str))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("insert chargeback"))?;
        Ok(())
    }

    async fn update_chargeback(&mut self, chargeback: &Chargeback) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE chargebacks SET status = $2, resolved_at = $3, resolved_by = $4
            WHERE id = $1
            "#,
        )
        .bind(chargeback.id.as_uuid())
        .bind(chargeback.status.as_str())
        .bind(opt_dt(chargeback.resolved_at))
        .bind(chargeback.resolved_by.as_ref().map(UserId::as_str))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update chargeback"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::ChargebackNotFound,
                "chargeback does not exist",
            ));
        }
        Ok(())
    }

    async fn find_chargeback_for_update(
        &mut self,
        id: ChargebackId,
    ) -> Result<Option<Chargeback>, DomainError> {
        let row: Option<ChargebackRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, creator_id, payment_reference, amount, currency, status,
                   reason, opened_at, resolved_at, resolved_by
            FROM chargebacks
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("find chargeback"))?;
        row.map(Chargeback::try_from).transpose()
    }

    // ─── Risk ────────────────────────────────────────────────────────

    async fn risk_inputs(
        &mut self,
        creator_id: &UserId,
        now: Timestamp,
    ) -> Result<RiskInputs, DomainError> {
        let (successful_payments, successful_volume): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(amount), 0)::BIGINT
            FROM payments
            WHERE creator_id = $1 AND status = 'success'
            "#,
        )
        .bind(creator_id.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error("aggregate payments"))?;

        let (chargebacks, lost, open): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'lost'),
                   COUNT(*) FILTER (WHERE status = 'open')
            FROM chargebacks
            WHERE creator_id = $1
            "#,
        )
        .bind(creator_id.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error("aggregate chargebacks"))?;

        let account = self.find_creator_account(creator_id).await?;

        Ok(RiskInputs {
            successful_payments: successful_payments.max(0) as u64,
            successful_volume,
            chargebacks: chargebacks.max(0) as u64,
            lost_chargebacks: lost.max(0) as u64,
            open_chargebacks: open.max(0) as u64,
            account_age_days: account.as_ref().map(|a| a.age_days(now)).unwrap_or(0),
            kyc_status: account.map(|a| a.kyc_status),
        })
    }

    async fn find_risk_profile(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Option<AmlRiskProfile>, DomainError> {
        let row: Option<RiskProfileRow> = sqlx::query_as(
            r#"
            SELECT creator_id, risk_score, daily_limit, monthly_limit, flags, last_risk_update
            FROM aml_risk_profiles
            WHERE creator_id = $1
            "#,
        )
        .bind(creator_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("find risk profile"))?;
        row.map(AmlRiskProfile::try_from).transpose()
    }

    async fn save_risk_profile(&mut self, profile: &AmlRiskProfile) -> Result<(), DomainError> {
        let flags: Vec<&str> = profile.flags.iter().map(|f| f.as_str()).collect();
        sqlx::query(
            r#"
            INSERT INTO aml_risk_profiles (
                creator_id, risk_score, daily_limit, monthly_limit, flags, last_risk_update
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (creator_id) DO UPDATE SET
                risk_score = EXCLUDED.risk_score,
                daily_limit = EXCLUDED.daily_limit,
                monthly_limit = EXCLUDED.monthly_limit,
                flags = EXCLUDED.flags,
                last_risk_update = EXCLUDED.last_risk_update
            "#,
        )
        .bind(profile.creator_id.as_str())
        .bind(i16::from(profile.risk_score))
        .bind(profile.daily_limit)
        .bind(profile.monthly_limit)
        .bind(&flags)
        .bind(profile.last_risk_update.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("save risk profile"))?;
        Ok(())
    }

    async fn find_creator_account(
        &mut self,
        creator_id: &UserId,
    ) -> Result<Option<CreatorAccount>, DomainError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT creator_id, kyc_status, created_at, kyc_approved_at
            FROM creator_accounts
            WHERE creator_id = $1
            "#,
        )
        .bind(creator_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("find creator account"))?;
        row.map(CreatorAccount::try_from).transpose()
    }

    async fn save_creator_account(&mut self, account: &CreatorAccount) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO creator_accounts (creator_id, kyc_status, created_at, kyc_approved_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (creator_id) DO UPDATE SET
                kyc_status = EXCLUDED.kyc_status,
                kyc_approved_at = EXCLUDED.kyc_approved_at
            "#,
        )
        .bind(account.creator_id.as_str())
        .bind(account.kyc_status.as_str())
        .bind(account.created_at.as_datetime())
        .bind(opt_dt(account.kyc_approved_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("save creator account"))?;
        Ok(())
    }

    // ─── Configuration ───────────────────────────────────────────────

    async fn current_fee_schedule(&mut self) -> Result<Option<FeeSchedule>, DomainError> {
        let row: Option<(i32, i32)> = sqlx::query_as(
            "SELECT version, platform_fee_bps FROM fee_schedules ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("load fee schedule"))?;

        row.map(|(version, bps)| {
            let bps = u32::try_from(bps).map_err(|_| {
                DomainError::new(ErrorCode::DatabaseError, "Negative platform_fee_bps")
            })?;
            FeeSchedule::new(bps, version).map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Invalid fee schedule: {}", e))
            })
        })
        .transpose()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(db_error("commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.rollback().await.map_err(db_error("roll back transaction"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::domain::payments::PaymentStatus;
    use crate::domain::subscription::{CancellationReason, SubscriptionStatus};

    fn payment_row() -> PaymentRow {
        let now = Utc::now();
        PaymentRow {
            id: Uuid::new_v4(),
            payer_id: "fan-1".to_string(),
            creator_id: "creator-1".to_string(),
            amount: 5000,
            currency: "NGN".to_string(),
            provider: "paystack".to_string(),
            reference: "chk-1".to_string(),
            provider_reference: None,
            status: "pending".to_string(),
            tier_name: "gold".to_string(),
            purpose: "checkout".to_string(),
            subscription_id: Some(Uuid::new_v4()),
            metadata: Json(BTreeMap::new()),
            webhook_received: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn payment_row_converts() {
        let payment = Payment::try_from(payment_row()).unwrap();
        assert_eq!(payment.provider, ProviderKind::Paystack);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.purpose, PaymentPurpose::Checkout);
        assert_eq!(payment.currency.as_str(), "NGN");
    }

    #[test]
    fn unknown_status_is_a_database_error() {
        let mut row = payment_row();
        row.status = "settled".to_string();
        let err = Payment::try_from(row).unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
        ] {
            let back: SubscriptionStatus = parse_column("status", status.as_str()).unwrap();
            assert_eq!(status, back);
        }
        for reason in [
            CancellationReason::UserRequested,
            CancellationReason::DunningExhausted,
            CancellationReason::Superseded,
        ] {
            let back: CancellationReason = parse_column("reason", reason.as_str()).unwrap();
            assert_eq!(reason, back);
        }
    }

    #[test]
    fn negative_attempt_number_is_rejected() {
        let now = Utc::now();
        let row = DunningRow {
            id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            attempt_number: -1,
            scheduled_at: now,
            outcome: "pending".to_string(),
            payment_reference: None,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        };
        assert!(DunningAttempt::try_from(row).is_err());
    }

    #[test]
    fn risk_profile_row_parses_flags() {
        let row = RiskProfileRow {
            creator_id: "creator-1".to_string(),
            risk_score: 80,
            daily_limit: 50_000,
            monthly_limit: 500_000,
            flags: vec!["open_dispute".to_string()],
            last_risk_update: Utc::now(),
        };
        let profile = AmlRiskProfile::try_from(row).unwrap();
        assert_eq!(profile.risk_score, 80);
        assert_eq!(profile.flags.len(), 1);
    }

    async fn credit_new_wallet(
        store: &PostgresBillingStore,
        creator: &UserId,
        usd: &Currency,
    ) -> Box<dyn BillingTransaction> {
        let mut tx = store.begin().await.unwrap();
        let mut wallet = tx
            .ensure_wallet_for_update(creator, usd, Timestamp::now())
            .await
            .unwrap();
        wallet.credit(4500, Timestamp::now()).unwrap();
        tx.save_wallet(&wallet).await.unwrap();
        tx
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL at DATABASE_URL"]
    async fn concurrent_first_credits_both_land() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let store = Arc::new(PostgresBillingStore::new(pool));
        let creator = UserId::new(format!("creator-{}", Uuid::new_v4())).unwrap();
        let usd = Currency::new("USD").unwrap();

        // First transaction inserts the row and holds it uncommitted.
        let first = credit_new_wallet(&store, &creator, &usd).await;
        let second = tokio::spawn({
            let store = store.clone();
            let creator = creator.clone();
            let usd = usd.clone();
            async move {
                let tx = credit_new_wallet(&store, &creator, &usd).await;
                tx.commit().await.unwrap();
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!second.is_finished());
        first.commit().await.unwrap();
        second.await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let wallet = tx.find_wallet_for_update(&creator, &usd).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 9000);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL at DATABASE_URL"]
    async fn saving_a_missing_wallet_fails() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let store = PostgresBillingStore::new(pool);
        let wallet = CreatorWallet::new(
            UserId::new(format!("creator-{}", Uuid::new_v4())).unwrap(),
            Currency::new("USD").unwrap(),
            Timestamp::now(),
        );

        let mut tx = store.begin().await.unwrap();
        let err = tx.save_wallet(&wallet).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::WalletNotFound);
    }
}

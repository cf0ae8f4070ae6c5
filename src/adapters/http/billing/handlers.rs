//! HTTP handlers for billing endpoints.
//!
//! These handlers connect axum routes to the application services. Identity
//! comes from the auth middleware; ownership and role rules live in the
//! services, except the creator-only payout guard.

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::dto::{
    CheckoutResponse, HealthResponse, OpenChargebackRequest, PayoutResponse,
    ProviderReferenceRequest, RequestPayoutRequest, ResolveChargebackRequest,
    StartCheckoutRequest, SubscriptionResponse,
};
use crate::adapters::http::middleware::{RequireAdmin, RequireAuth};
use crate::adapters::http::{ApiError, BillingAppState};
use crate::domain::foundation::{ChargebackId, PayoutId, Role, SubscriptionId, UserId};
use crate::domain::payments::BillingError;

// ════════════════════════════════════════════════════════════════════════════════
// Fan Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/checkout - Start a checkout for a creator tier
pub async fn start_checkout(
    State(state): State<BillingAppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.checkout.start_checkout(&user, request.into()).await?;
    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(session))))
}

/// POST /api/checkout/provider-reference - Attach the provider's id to a checkout
pub async fn record_provider_reference(
    State(state): State<BillingAppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<ProviderReferenceRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .checkout
        .record_provider_reference(
            &user,
            request.provider,
            &request.reference,
            &request.provider_reference,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/subscriptions/:id/cancel - Cancel a subscription (owner or admin)
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<SubscriptionId>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.lifecycle.cancel_subscription(&user, id).await?;
    Ok(Json(subscription.into()))
}

// ════════════════════════════════════════════════════════════════════════════════
// Creator Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/payouts - Request a payout from the caller's wallet
pub async fn request_payout(
    State(state): State<BillingAppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<RequestPayoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role != Role::Creator {
        return Err(BillingError::Forbidden.into());
    }
    let payout = state
        .ledger
        .request_payout(
            &user.id,
            request.amount,
            &request.currency,
            &request.destination,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(PayoutResponse::from(payout))))
}

// ════════════════════════════════════════════════════════════════════════════════
// Admin Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/admin/payouts/:id/approve
pub async fn approve_payout(
    State(state): State<BillingAppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<PayoutId>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout = state.ledger.approve_payout(&admin, id).await?;
    Ok(Json(payout.into()))
}

/// POST /api/admin/chargebacks - Open a dispute and freeze the creator
pub async fn open_chargeback(
    State(state): State<BillingAppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(request): Json<OpenChargebackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chargeback = state.risk.open_chargeback(&admin, request.into()).await?;
    Ok((StatusCode::CREATED, Json(chargeback)))
}

/// POST /api/admin/chargebacks/:id/resolve
pub async fn resolve_chargeback(
    State(state): State<BillingAppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ChargebackId>,
    Json(request): Json<ResolveChargebackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chargeback = state
        .risk
        .resolve_chargeback(&admin, id, request.resolution)
        .await?;
    Ok(Json(chargeback))
}

/// POST /api/admin/creators/:id/kyc-approved
pub async fn kyc_approved(
    State(state): State<BillingAppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(creator_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let creator_id = UserId::new(creator_id)?;
    let profile = state.risk.on_kyc_approved(&admin, &creator_id).await?;
    Ok(Json(profile))
}

// ════════════════════════════════════════════════════════════════════════════════
// Health
// ════════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

//! HTTP handlers for the periodic jobs.

use axum::extract::{Json, State};

use crate::adapters::http::middleware::JobAuthorized;
use crate::adapters::http::{ApiError, BillingAppState};
use crate::application::{DunningSweepReport, RenewalScanReport};

/// POST /jobs/renewal-scan
pub async fn renewal_scan(
    State(state): State<BillingAppState>,
    _auth: JobAuthorized,
) -> Result<Json<RenewalScanReport>, ApiError> {
    let report = state.lifecycle.run_renewal_scan().await?;
    Ok(Json(report))
}

/// POST /jobs/dunning-sweep
pub async fn dunning_sweep(
    State(state): State<BillingAppState>,
    _auth: JobAuthorized,
) -> Result<Json<DunningSweepReport>, ApiError> {
    let report = state.dunning.process_dunning_attempts().await?;
    Ok(Json(report))
}

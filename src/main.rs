//! creator-billing server entry point.

use std::error::Error;
use std::sync::Arc;

use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use creator_billing::adapters::auth::JwtSessionValidator;
use creator_billing::adapters::http::{billing_router, BillingAppState};
use creator_billing::adapters::notify::TracingNotifier;
use creator_billing::adapters::postgres::PostgresBillingStore;
use creator_billing::adapters::providers::ProviderRouter;
use creator_billing::application::BillingSettings;
use creator_billing::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load_validated()?;
    init_tracing(&config);

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;
    tracing::info!("database connection established");

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
    }

    let router = ProviderRouter::from_config(&config.providers, &config.billing)?;
    tracing::info!(providers = ?config.providers.enabled(), "payment providers enabled");

    let settings = BillingSettings::from_config(&config.billing, &config.dunning)?;
    let state = BillingAppState::build(
        Arc::new(PostgresBillingStore::new(pool)),
        Arc::new(router),
        Arc::new(TracingNotifier::new()),
        settings,
        SecretString::new(config.auth.job_secret.clone()),
    );
    let validator = Arc::new(JwtSessionValidator::from_config(&config.auth));

    let app = billing_router(state, validator)
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "creator-billing listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// JSON lines in production, human-readable output elsewhere.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

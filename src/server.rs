use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::api::{
    handler::{
        approve_operation, create_operation, get_balance, get_deposit, get_operation,
        get_treasury_balance, get_withdrawal, health_check, initiate_deposit,
        list_pending_operations, list_transactions, reject_operation, request_withdrawal,
        AppState,
    },
    webhooks::{deposit_webhook, withdrawal_webhook},
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Treasury operation endpoints
                .route("/operations", post(create_operation))
                .route("/operations/pending", get(list_pending_operations))
                .route("/operations/:id", get(get_operation))
                .route("/operations/:id/approve", post(approve_operation))
                .route("/operations/:id/reject", post(reject_operation))
                // Payment endpoints
                .route("/deposits", post(initiate_deposit))
                .route("/deposits/:order_id", get(get_deposit))
                .route("/withdrawals", post(request_withdrawal))
                .route("/withdrawals/:reference", get(get_withdrawal))
                // Provider webhook endpoints
                .route("/webhooks/payments/deposit", post(deposit_webhook))
                .route("/webhooks/payments/withdrawal", post(withdrawal_webhook))
                // Account endpoints
                .route("/balance/:user_id", get(get_balance))
                .route("/transactions/:user_id", get(list_transactions))
                // Admin endpoints
                .route("/admin/treasury", get(get_treasury_balance)),
        )
        .layer(CorsLayer::very_permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

use axum::{extract::State, Json};
use tracing::{error, warn};

use super::handler::AppState;
use super::models::WebhookAck;
use crate::error::{AppError, AppResult, PaymentError};
use crate::payments::models::PaymentWebhookPayload;
use crate::payments::WebhookDisposition;

/// Provider callback for deposit sessions
/// POST /webhooks/payments/deposit
///
/// Delivery is at-least-once and unordered. Anything we could classify is
/// acked with 200 so the provider stops retrying; only a failure on our
/// side (database down, mid-flight error) propagates, which makes the
/// provider redeliver later.
pub async fn deposit_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhookPayload>,
) -> AppResult<Json<WebhookAck>> {
    match state.reconciler.handle_deposit_webhook(&payload).await {
        Ok(disposition) => Ok(Json(WebhookAck::from_disposition(disposition))),
        Err(AppError::Payment(PaymentError::UnknownReference(order_id))) => {
            warn!(order_id, "deposit webhook for unknown order, acknowledged");
            Ok(Json(WebhookAck::from_disposition(WebhookDisposition::Ignored)))
        }
        Err(e @ AppError::InvalidRequest(_)) => Err(e),
        Err(e) => {
            error!("deposit webhook processing failed: {:?}", e);
            Err(e)
        }
    }
}

/// Provider callback for withdrawal payouts
/// POST /webhooks/payments/withdrawal
pub async fn withdrawal_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhookPayload>,
) -> AppResult<Json<WebhookAck>> {
    match state.reconciler.handle_withdrawal_webhook(&payload).await {
        Ok(disposition) => Ok(Json(WebhookAck::from_disposition(disposition))),
        Err(AppError::Payment(PaymentError::UnknownReference(reference))) => {
            warn!(reference, "withdrawal webhook for unknown reference, acknowledged");
            Ok(Json(WebhookAck::from_disposition(WebhookDisposition::Ignored)))
        }
        Err(e @ AppError::InvalidRequest(_)) => Err(e),
        Err(e) => {
            error!("withdrawal webhook processing failed: {:?}", e);
            Err(e)
        }
    }
}

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    chain::TokenLedger,
    error::{AppError, AppResult},
    payments::PaymentReconciler,
    store::WalletStore,
    treasury::{OperationLedger, QuorumApprovalEngine},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WalletStore>,
    pub operations: Arc<OperationLedger>,
    pub approvals: Arc<QuorumApprovalEngine>,
    pub reconciler: Arc<PaymentReconciler>,
    pub token_ledger: Arc<dyn TokenLedger>,
    pub issuer_address: String,
    pub asset_code: String,
}

// ========== TREASURY OPERATIONS ==========

/// Create a treasury operation (mint, burn, config change)
/// POST /operations
pub async fn create_operation(
    State(state): State<AppState>,
    Json(request): Json<CreateOperationRequest>,
) -> AppResult<Json<OperationResponse>> {
    info!(
        "Creating treasury operation: {:?}, quorum {}",
        request.operation.op_type(),
        request.required_signatures
    );

    let operation = state
        .operations
        .create(request.operation, request.required_signatures)
        .await?;

    Ok(Json(OperationResponse::from(operation)))
}

/// Record one signer's approval; quorum promotion triggers execution
/// POST /operations/:id/approve
pub async fn approve_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> AppResult<Json<OperationResponse>> {
    request
        .validate()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    info!(
        "Approval vote on operation {} from signer {}",
        operation_id, request.signer_id
    );

    let operation = state
        .approvals
        .approve(operation_id, &request.signer_id, request.credential.as_deref())
        .await?;

    Ok(Json(OperationResponse::from(operation)))
}

/// Reject a pending operation
/// POST /operations/:id/reject
pub async fn reject_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> AppResult<Json<OperationResponse>> {
    request
        .validate()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    info!(
        "Rejecting operation {} (signer {}): {}",
        operation_id, request.signer_id, request.reason
    );

    let reason = format!("rejected by {}: {}", request.signer_id, request.reason);
    let operation = state.approvals.reject(operation_id, &reason).await?;

    Ok(Json(OperationResponse::from(operation)))
}

/// GET /operations/:id
pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<Uuid>,
) -> AppResult<Json<OperationResponse>> {
    let operation = state.operations.get(operation_id).await?;
    Ok(Json(OperationResponse::from(operation)))
}

/// GET /operations/pending
pub async fn list_pending_operations(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let operations = state.operations.list_pending().await?;
    let responses: Vec<OperationResponse> =
        operations.into_iter().map(OperationResponse::from).collect();

    Ok(Json(serde_json::json!({
        "count": responses.len(),
        "operations": responses,
    })))
}

// ========== PAYMENTS ==========

/// Start a fiat deposit with the payment provider
/// POST /deposits
pub async fn initiate_deposit(
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>,
) -> AppResult<Json<DepositResponse>> {
    let deposit = state
        .reconciler
        .initiate_deposit(request.user_id, request.amount)
        .await?;

    Ok(Json(DepositResponse::from(deposit)))
}

/// Request a withdrawal; the balance is debited before the payout starts
/// POST /withdrawals
pub async fn request_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawRequest>,
) -> AppResult<Json<WithdrawalResponse>> {
    request
        .validate()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let withdrawal = state
        .reconciler
        .request_withdrawal(request.user_id, request.amount, &request.destination)
        .await?;

    Ok(Json(WithdrawalResponse::from(withdrawal)))
}

/// GET /deposits/:order_id
pub async fn get_deposit(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> AppResult<Json<DepositResponse>> {
    let deposit = state
        .store
        .get_deposit_by_order(&order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("deposit {}", order_id)))?;

    Ok(Json(DepositResponse::from(deposit)))
}

/// GET /withdrawals/:reference
pub async fn get_withdrawal(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> AppResult<Json<WithdrawalResponse>> {
    let withdrawal = state
        .store
        .get_withdrawal_by_reference(&reference)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("withdrawal {}", reference)))?;

    Ok(Json(WithdrawalResponse::from(withdrawal)))
}

// ========== ACCOUNTS ==========

/// GET /balance/:user_id
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<BalanceResponse>> {
    let balance = state.store.get_balance(user_id).await?;
    Ok(Json(BalanceResponse::from_lookup(user_id, balance)))
}

/// GET /transactions/:user_id
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let transactions = state.store.list_transactions(user_id).await?;
    let responses: Vec<TransactionResponse> = transactions
        .into_iter()
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "count": responses.len(),
        "transactions": responses,
    })))
}

// ========== ADMIN ==========

/// Issuer account balance straight from the external ledger
/// GET /admin/treasury
pub async fn get_treasury_balance(
    State(state): State<AppState>,
) -> AppResult<Json<TreasuryBalanceResponse>> {
    info!("Fetching issuer balance from the external ledger");

    let balance = state
        .token_ledger
        .query_balance(&state.issuer_address, &state.asset_code)
        .await?;

    Ok(Json(TreasuryBalanceResponse {
        address: state.issuer_address.clone(),
        asset: state.asset_code.clone(),
        balance: balance.to_string(),
        fetched_at: Utc::now(),
    }))
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
}

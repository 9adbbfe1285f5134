use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::accounts::models::{Balance, LedgerTransaction};
use crate::payments::models::{PendingDeposit, PendingWithdrawal};
use crate::payments::WebhookDisposition;
use crate::treasury::models::{Operation, OperationKind};

// ========== REQUEST MODELS ==========

/// Request to create a treasury operation awaiting quorum approval
#[derive(Debug, Deserialize)]
pub struct CreateOperationRequest {
    #[serde(flatten)]
    pub operation: OperationKind,
    pub required_signatures: i32,
}

/// One signer's approval vote
#[derive(Debug, Deserialize, Validate)]
pub struct ApproveRequest {
    #[validate(length(min = 1, message = "signer_id must not be empty"))]
    pub signer_id: String,
    /// Hex ed25519 signature over the operation digest, when the roster
    /// requires one
    pub credential: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(min = 1, message = "signer_id must not be empty"))]
    pub signer_id: String,
    #[validate(length(min = 1, message = "reason must not be empty"))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, message = "destination must not be empty"))]
    pub destination: String,
}

// ========== RESPONSE MODELS ==========

/// Treasury operation as presented to callers. `status` folds the
/// unknown-outcome flag in: an approved operation whose ledger submission
/// timed out reads `pending_verification`.
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub operation_id: Uuid,
    #[serde(flatten)]
    pub operation: OperationKind,
    pub status: String,
    pub required_signatures: i32,
    pub current_signatures: i32,
    pub signers: Vec<String>,
    pub execution_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Operation> for OperationResponse {
    fn from(operation: Operation) -> Self {
        Self {
            operation_id: operation.id,
            status: operation.display_status().to_string(),
            operation: operation.kind,
            required_signatures: operation.required_signatures,
            current_signatures: operation.current_signatures,
            signers: operation.signers,
            execution_hash: operation.execution_hash,
            failure_reason: operation.failure_reason,
            created_at: operation.created_at,
            updated_at: operation.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub order_id: String,
    pub user_id: Uuid,
    pub amount: String,
    pub status: String,
}

impl From<PendingDeposit> for DepositResponse {
    fn from(deposit: PendingDeposit) -> Self {
        Self {
            order_id: deposit.order_id,
            user_id: deposit.user_id,
            amount: deposit.amount.to_string(),
            status: format!("{:?}", deposit.status).to_lowercase(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub reference: String,
    pub user_id: Uuid,
    pub amount: String,
    pub destination: String,
    pub status: String,
}

impl From<PendingWithdrawal> for WithdrawalResponse {
    fn from(withdrawal: PendingWithdrawal) -> Self {
        Self {
            reference: withdrawal.reference,
            user_id: withdrawal.user_id,
            amount: withdrawal.amount.to_string(),
            destination: withdrawal.destination,
            status: format!("{:?}", withdrawal.status).to_lowercase(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub amount: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BalanceResponse {
    pub fn from_lookup(user_id: Uuid, balance: Option<Balance>) -> Self {
        match balance {
            Some(b) => Self {
                user_id,
                amount: b.amount.to_string(),
                updated_at: Some(b.updated_at),
            },
            // No row yet means the account has never been credited
            None => Self {
                user_id,
                amount: "0".to_string(),
                updated_at: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    pub kind: String,
    pub direction: String,
    pub amount: String,
    pub status: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerTransaction> for TransactionResponse {
    fn from(tx: LedgerTransaction) -> Self {
        Self {
            transaction_id: tx.id,
            kind: format!("{:?}", tx.kind).to_lowercase(),
            direction: format!("{:?}", tx.direction).to_lowercase(),
            amount: tx.amount.to_string(),
            status: tx.status,
            reference: tx.reference,
            created_at: tx.created_at,
        }
    }
}

/// Acknowledgement returned to the provider. Always success-shaped for a
/// delivery we could classify, so the provider stops retrying.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: String,
    pub message: String,
}

impl WebhookAck {
    pub fn from_disposition(disposition: WebhookDisposition) -> Self {
        let (status, message) = match disposition {
            WebhookDisposition::Processed => ("ok", "webhook processed"),
            WebhookDisposition::Replayed => ("ok", "already processed"),
            WebhookDisposition::Ignored => ("ignored", "no action required"),
        };
        Self {
            status: status.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TreasuryBalanceResponse {
    pub address: String,
    pub asset: String,
    pub balance: String,
    pub fetched_at: DateTime<Utc>,
}

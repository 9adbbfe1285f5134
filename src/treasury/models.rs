use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Operation status enum
///
/// Valid transitions:
/// - Pending → Approved, Rejected
/// - Approved → Executed, Failed
/// - Terminal states (Executed, Failed, Rejected) → NO TRANSITIONS ALLOWED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "operation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Approved => "approved",
            OperationStatus::Rejected => "rejected",
            OperationStatus::Executed => "executed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Rejected | OperationStatus::Executed | OperationStatus::Failed
        )
    }

    /// Reference definition of the state machine. At runtime each
    /// transition is enforced by a conditional update keyed on the
    /// expected prior status; this exists for the tests that pin the
    /// machine down.
    #[cfg(test)]
    pub fn validate_transition(from: OperationStatus, to: OperationStatus) -> AppResult<()> {
        let allowed = match from {
            OperationStatus::Pending => {
                vec![OperationStatus::Approved, OperationStatus::Rejected]
            }
            OperationStatus::Approved => {
                vec![OperationStatus::Executed, OperationStatus::Failed]
            }
            _ => Vec::new(),
        };

        if !allowed.contains(&to) {
            return Err(AppError::invalid_state(
                from.as_str(),
                format!("{:?}", allowed),
            ));
        }

        Ok(())
    }
}

/// Denormalized tag for the operation payload, used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "operation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Mint,
    Burn,
    ConfigChange,
}

/// Privileged treasury action with its typed payload. Stored as tagged
/// JSON; the dispatcher matches exhaustively on the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Pay `amount` of the issued asset from the issuer to `destination`
    Mint {
        amount: Decimal,
        destination: String,
        /// Internal account credited alongside the on-ledger mint, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// Pay `amount` from `source` back to the issuer, retiring it
    Burn {
        amount: Decimal,
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// Update an issuer-level setting on the external ledger
    ConfigChange { key: String, value: String },
}

impl OperationKind {
    pub fn op_type(&self) -> OperationType {
        match self {
            OperationKind::Mint { .. } => OperationType::Mint,
            OperationKind::Burn { .. } => OperationType::Burn,
            OperationKind::ConfigChange { .. } => OperationType::ConfigChange,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        match self {
            OperationKind::Mint {
                amount,
                destination,
                ..
            } => {
                if *amount <= Decimal::ZERO {
                    return Err(AppError::InvalidRequest(
                        "Mint amount must be positive".to_string(),
                    ));
                }
                if destination.is_empty() {
                    return Err(AppError::InvalidRequest(
                        "Mint destination must not be empty".to_string(),
                    ));
                }
            }
            OperationKind::Burn { amount, source, .. } => {
                if *amount <= Decimal::ZERO {
                    return Err(AppError::InvalidRequest(
                        "Burn amount must be positive".to_string(),
                    ));
                }
                if source.is_empty() {
                    return Err(AppError::InvalidRequest(
                        "Burn source must not be empty".to_string(),
                    ));
                }
            }
            OperationKind::ConfigChange { key, .. } => {
                if key.is_empty() {
                    return Err(AppError::InvalidRequest(
                        "Config change key must not be empty".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// A proposed privileged treasury action and its approval state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub required_signatures: i32,
    pub current_signatures: i32,
    pub status: OperationStatus,
    /// Distinct signer identifiers that have approved; always
    /// `current_signatures` entries long
    pub signers: Vec<String>,
    pub execution_hash: Option<String>,
    pub failure_reason: Option<String>,
    /// Set when a ledger submission timed out without a terminal result;
    /// resolved out-of-band, never auto-retried
    pub outcome_unknown: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(kind: OperationKind, required_signatures: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            required_signatures,
            current_signatures: 0,
            status: OperationStatus::Pending,
            signers: Vec::new(),
            execution_hash: None,
            failure_reason: None,
            outcome_unknown: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Caller-facing status string. An approved operation whose ledger
    /// outcome is unknown is shown as pending verification, never as
    /// success or failure.
    pub fn display_status(&self) -> &'static str {
        if self.outcome_unknown && self.status == OperationStatus::Approved {
            "pending_verification"
        } else {
            self.status.as_str()
        }
    }
}

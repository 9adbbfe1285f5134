use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

/// Audit transaction category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Mint,
    Burn,
    Transfer,
    Deposit,
    Withdrawal,
    Conversion,
}

/// Direction a balance mutation moves funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

/// Single non-negative balance per user, owned by the LedgerAccountant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit row, written in the same atomic unit as the balance
/// mutation it records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub direction: Direction,
    pub amount: Decimal,
    pub status: String,
    pub reference: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    pub fn new(
        user_id: Uuid,
        kind: TransactionKind,
        direction: Direction,
        amount: Decimal,
        reference: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            direction,
            amount,
            status: "completed".to_string(),
            reference,
            metadata,
            created_at: Utc::now(),
        }
    }
}

use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use super::models::{Direction, LedgerTransaction, TransactionKind};
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

/// The single choke point for mutating a user balance. Every credit or
/// debit writes its audit row inside the caller's open transaction, so the
/// balance change and the record of it commit (or roll back) together.
pub struct LedgerAccountant;

impl LedgerAccountant {
    pub fn new() -> Self {
        Self
    }

    pub async fn apply_transaction(
        &self,
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        kind: TransactionKind,
        direction: Direction,
        amount: Decimal,
        reference: Option<&str>,
        metadata: serde_json::Value,
    ) -> AppResult<LedgerTransaction> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "Transaction amount must be positive".to_string(),
            ));
        }

        match direction {
            Direction::Credit => tx.credit_balance(user_id, amount).await?,
            Direction::Debit => {
                // The conditional update applies and checks in one
                // statement under the row lock
                if !tx.debit_balance(user_id, amount).await? {
                    let available = tx.get_balance_amount(user_id).await?;
                    return Err(AppError::InsufficientBalance {
                        required: amount.to_string(),
                        available: available.to_string(),
                    });
                }
            }
        }

        let record = LedgerTransaction::new(
            user_id,
            kind,
            direction,
            amount,
            reference.map(str::to_string),
            metadata,
        );
        tx.insert_transaction(&record).await?;

        debug!(
            user_id = %user_id,
            kind = ?kind,
            direction = ?direction,
            amount = %amount,
            "balance mutation recorded"
        );

        Ok(record)
    }
}

impl Default for LedgerAccountant {
    fn default() -> Self {
        Self::new()
    }
}

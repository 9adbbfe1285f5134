use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::models::{Operation, OperationKind, OperationStatus};
use crate::accounts::accountant::LedgerAccountant;
use crate::accounts::models::{Direction, TransactionKind};
use crate::chain::{LedgerTx, TokenLedger};
use crate::error::{AppError, AppResult, TreasuryError};
use crate::store::WalletStore;

/// Submits quorum-approved operations to the external ledger and records
/// the outcome. Invoked exactly once per operation by the quorum handoff;
/// the execution claim rejects any duplicate trigger before it can reach
/// the ledger.
pub struct ExecutionDispatcher {
    store: Arc<dyn WalletStore>,
    ledger: Arc<dyn TokenLedger>,
    accountant: Arc<LedgerAccountant>,
    issuer_address: String,
    asset_code: String,
    submit_timeout: Duration,
}

impl ExecutionDispatcher {
    pub fn new(
        store: Arc<dyn WalletStore>,
        ledger: Arc<dyn TokenLedger>,
        accountant: Arc<LedgerAccountant>,
        issuer_address: String,
        asset_code: String,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            accountant,
            issuer_address,
            asset_code,
            submit_timeout,
        }
    }

    pub async fn execute(&self, operation_id: Uuid) -> AppResult<Operation> {
        // Claim in its own short transaction so the row lock is not held
        // across the external call
        let operation = self.claim(operation_id).await?;
        let ledger_tx = self.build_ledger_tx(&operation.kind);

        match timeout(self.submit_timeout, self.ledger.submit(ledger_tx)).await {
            Ok(Ok(receipt)) => self.record_success(&operation, &receipt.hash).await,
            Ok(Err(e)) => self.record_failure(&operation, &e).await,
            Err(_) => self.record_unknown_outcome(&operation).await,
        }
    }

    async fn claim(&self, operation_id: Uuid) -> AppResult<Operation> {
        let mut tx = self.store.begin().await?;

        let operation = tx
            .operation_for_update(operation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))?;

        if operation.status != OperationStatus::Approved {
            return Err(AppError::invalid_state(
                operation.status.as_str(),
                OperationStatus::Approved.as_str(),
            ));
        }

        if !tx.claim_execution(operation_id).await? {
            // A duplicate trigger (retried webhook, replayed queue
            // message) lost the claim; it must not submit again
            warn!(operation_id = %operation_id, "execution already claimed, skipping");
            return Err(AppError::invalid_state(
                "claimed",
                OperationStatus::Approved.as_str(),
            ));
        }
        tx.commit().await?;

        Ok(operation)
    }

    fn build_ledger_tx(&self, kind: &OperationKind) -> LedgerTx {
        match kind {
            OperationKind::Mint {
                amount,
                destination,
                ..
            } => LedgerTx::Payment {
                from: self.issuer_address.clone(),
                to: destination.clone(),
                amount: *amount,
                asset: self.asset_code.clone(),
            },
            OperationKind::Burn { amount, source, .. } => LedgerTx::Payment {
                from: source.clone(),
                to: self.issuer_address.clone(),
                amount: *amount,
                asset: self.asset_code.clone(),
            },
            OperationKind::ConfigChange { key, value } => LedgerTx::ConfigUpdate {
                key: key.clone(),
                value: value.clone(),
            },
        }
    }

    async fn record_success(&self, operation: &Operation, hash: &str) -> AppResult<Operation> {
        let mut tx = self.store.begin().await?;
        if !tx.finish_execution_success(operation.id, hash).await? {
            drop(tx);
            return self.foreign_transition(operation.id).await;
        }

        let mut balance_discrepancy = None;
        if let Some((user_id, kind, direction, amount)) = balance_effect(&operation.kind) {
            let applied = self
                .accountant
                .apply_transaction(
                    &mut *tx,
                    user_id,
                    kind,
                    direction,
                    amount,
                    Some(hash),
                    serde_json::json!({ "operation_id": operation.id }),
                )
                .await;
            if let Err(e) = applied {
                // The external effect is irreversible; the operation must
                // still be recorded as executed. Redo the status write
                // without the balance leg and surface the discrepancy.
                balance_discrepancy = Some(e);
            }
        }

        if let Some(e) = balance_discrepancy {
            drop(tx);
            let mut tx = self.store.begin().await?;
            if !tx.finish_execution_success(operation.id, hash).await? {
                drop(tx);
                return self.foreign_transition(operation.id).await;
            }
            tx.commit().await?;
            error!(
                operation_id = %operation.id,
                execution_hash = hash,
                "RECONCILIATION ALERT: ledger executed but balance update failed: {:?}",
                e
            );
        } else {
            tx.commit().await?;
        }

        info!(
            operation_id = %operation.id,
            execution_hash = hash,
            "operation executed"
        );

        self.refreshed(operation.id).await
    }

    async fn record_failure(
        &self,
        operation: &Operation,
        cause: &AppError,
    ) -> AppResult<Operation> {
        let mut tx = self.store.begin().await?;
        if !tx
            .finish_execution_failure(operation.id, &cause.to_string())
            .await?
        {
            drop(tx);
            return self.foreign_transition(operation.id).await;
        }
        tx.commit().await?;

        // Failed operations are never resurrected; a caller creates a new
        // operation instead
        warn!(
            operation_id = %operation.id,
            "ledger rejected operation: {:?}",
            cause
        );

        self.refreshed(operation.id).await
    }

    async fn record_unknown_outcome(&self, operation: &Operation) -> AppResult<Operation> {
        let mut tx = self.store.begin().await?;
        if !tx.mark_outcome_unknown(operation.id).await? {
            drop(tx);
            return self.foreign_transition(operation.id).await;
        }
        tx.commit().await?;

        // Blind retry risks a duplicate submission; the claim stays held
        // and resolution happens out-of-band against the external ledger
        error!(
            operation_id = %operation.id,
            "RECONCILIATION ALERT: ledger submission timed out with unknown outcome"
        );

        Err(AppError::Treasury(TreasuryError::AmbiguousOutcome(
            operation.id,
        )))
    }

    /// Zero rows from an outcome write means the operation left the
    /// approved state under our feet. The store state wins; nothing is
    /// overwritten and the caller gets the conflict.
    async fn foreign_transition(&self, operation_id: Uuid) -> AppResult<Operation> {
        let current = self.refreshed(operation_id).await?;
        error!(
            operation_id = %operation_id,
            status = current.status.as_str(),
            "operation left approved state before its outcome was recorded"
        );
        Err(AppError::invalid_state(
            current.status.as_str(),
            OperationStatus::Approved.as_str(),
        ))
    }

    async fn refreshed(&self, operation_id: Uuid) -> AppResult<Operation> {
        self.store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))
    }
}

/// Internal balance leg of an operation, when its payload names one
fn balance_effect(
    kind: &OperationKind,
) -> Option<(Uuid, TransactionKind, Direction, rust_decimal::Decimal)> {
    match kind {
        OperationKind::Mint {
            amount,
            user_id: Some(user_id),
            ..
        } => Some((*user_id, TransactionKind::Mint, Direction::Credit, *amount)),
        OperationKind::Burn {
            amount,
            user_id: Some(user_id),
            ..
        } => Some((*user_id, TransactionKind::Burn, Direction::Debit, *amount)),
        _ => None,
    }
}

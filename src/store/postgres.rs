//! sqlx/Postgres implementation of the store contract.
//!
//! Every state transition is a conditional UPDATE keyed on the expected
//! prior status; a zero-row result is surfaced to the caller instead of
//! being reapplied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{StoreTx, WalletStore};
use crate::accounts::models::{Balance, Direction, LedgerTransaction, TransactionKind};
use crate::error::{AppError, AppResult};
use crate::payments::models::{
    DepositStatus, PendingDeposit, PendingWithdrawal, WithdrawalStatus,
};
use crate::treasury::models::{Operation, OperationStatus};

/// Postgres-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then run the embedded migrations.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[derive(FromRow)]
struct OperationRow {
    id: Uuid,
    payload: serde_json::Value,
    required_signatures: i32,
    current_signatures: i32,
    status: OperationStatus,
    execution_hash: Option<String>,
    failure_reason: Option<String>,
    outcome_unknown: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OperationRow {
    fn into_operation(self, signers: Vec<String>) -> AppResult<Operation> {
        Ok(Operation {
            id: self.id,
            kind: serde_json::from_value(self.payload)?,
            required_signatures: self.required_signatures,
            current_signatures: self.current_signatures,
            status: self.status,
            signers,
            execution_hash: self.execution_hash,
            failure_reason: self.failure_reason,
            outcome_unknown: self.outcome_unknown,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const OPERATION_COLUMNS: &str = "id, payload, required_signatures, current_signatures, \
     status, execution_hash, failure_reason, outcome_unknown, created_at, updated_at";

async fn operation_signers<'e, E>(executor: E, operation_id: Uuid) -> AppResult<Vec<String>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let signers = sqlx::query_scalar::<_, String>(
        "SELECT signer_id FROM operation_signers WHERE operation_id = $1 ORDER BY approved_at",
    )
    .bind(operation_id)
    .fetch_all(executor)
    .await?;

    Ok(signers)
}

#[derive(FromRow)]
struct DepositRow {
    id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    order_id: String,
    status: DepositStatus,
    provider_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DepositRow> for PendingDeposit {
    fn from(row: DepositRow) -> Self {
        PendingDeposit {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            order_id: row.order_id,
            status: row.status,
            provider_reference: row.provider_reference,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct WithdrawalRow {
    id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    reference: String,
    destination: String,
    status: WithdrawalStatus,
    transaction_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WithdrawalRow> for PendingWithdrawal {
    fn from(row: WithdrawalRow) -> Self {
        PendingWithdrawal {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            reference: row.reference,
            destination: row.destination,
            status: row.status,
            transaction_id: row.transaction_id,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct BalanceRow {
    user_id: Uuid,
    amount: Decimal,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    kind: TransactionKind,
    direction: Direction,
    amount: Decimal,
    status: String,
    reference: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<TransactionRow> for LedgerTransaction {
    fn from(row: TransactionRow) -> Self {
        LedgerTransaction {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            direction: row.direction,
            amount: row.amount,
            status: row.status,
            reference: row.reference,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl WalletStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_operation(&self, id: Uuid) -> AppResult<Option<Operation>> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM operations WHERE id = $1",
            OPERATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let signers = operation_signers(&self.pool, row.id).await?;
                Ok(Some(row.into_operation(signers)?))
            }
            None => Ok(None),
        }
    }

    async fn list_pending_operations(&self) -> AppResult<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM operations WHERE status = $1 ORDER BY created_at ASC",
            OPERATION_COLUMNS
        ))
        .bind(OperationStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in rows {
            let signers = operation_signers(&self.pool, row.id).await?;
            operations.push(row.into_operation(signers)?);
        }

        Ok(operations)
    }

    async fn get_deposit_by_order(&self, order_id: &str) -> AppResult<Option<PendingDeposit>> {
        let row = sqlx::query_as::<_, DepositRow>(
            "SELECT id, user_id, amount, order_id, status, provider_reference, created_at, updated_at \
             FROM pending_deposits WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_withdrawal_by_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<PendingWithdrawal>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT id, user_id, amount, reference, destination, status, transaction_id, \
             failure_reason, created_at, updated_at \
             FROM pending_withdrawals WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_balance(&self, user_id: Uuid) -> AppResult<Option<Balance>> {
        let row = sqlx::query_as::<_, BalanceRow>(
            "SELECT user_id, amount, updated_at FROM balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Balance {
            user_id: r.user_id,
            amount: r.amount,
            updated_at: r.updated_at,
        }))
    }

    async fn list_transactions(&self, user_id: Uuid) -> AppResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, user_id, kind, direction, amount, status, reference, metadata, created_at \
             FROM transactions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_operation(&mut self, operation: &Operation) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO operations \
             (id, op_type, payload, required_signatures, current_signatures, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(operation.id)
        .bind(operation.kind.op_type())
        .bind(serde_json::to_value(&operation.kind)?)
        .bind(operation.required_signatures)
        .bind(operation.current_signatures)
        .bind(operation.status)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn operation_for_update(&mut self, id: Uuid) -> AppResult<Option<Operation>> {
        // Row lock held until the transaction ends
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM operations WHERE id = $1 FOR UPDATE",
            OPERATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                let signers = operation_signers(&mut *self.tx, row.id).await?;
                Ok(Some(row.into_operation(signers)?))
            }
            None => Ok(None),
        }
    }

    async fn add_operation_signer(
        &mut self,
        operation_id: Uuid,
        signer_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO operation_signers (operation_id, signer_id) VALUES ($1, $2) \
             ON CONFLICT (operation_id, signer_id) DO NOTHING",
        )
        .bind(operation_id)
        .bind(signer_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn bump_signature_count(&mut self, operation_id: Uuid) -> AppResult<i32> {
        let count = sqlx::query_scalar::<_, i32>(
            "UPDATE operations \
             SET current_signatures = current_signatures + 1, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING current_signatures",
        )
        .bind(operation_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))?;

        Ok(count)
    }

    async fn promote_if_quorum(&mut self, operation_id: Uuid) -> AppResult<bool> {
        // Conditional on both status and count, so two racing approvals
        // cannot both win the handoff to execution
        let result = sqlx::query(
            "UPDATE operations SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = $3 AND current_signatures >= required_signatures",
        )
        .bind(operation_id)
        .bind(OperationStatus::Approved)
        .bind(OperationStatus::Pending)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_rejected(&mut self, operation_id: Uuid, reason: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE operations SET status = $2, failure_reason = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(operation_id)
        .bind(OperationStatus::Rejected)
        .bind(reason)
        .bind(OperationStatus::Pending)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_execution(&mut self, operation_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE operations SET claimed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = $2 AND claimed_at IS NULL",
        )
        .bind(operation_id)
        .bind(OperationStatus::Approved)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish_execution_success(
        &mut self,
        operation_id: Uuid,
        execution_hash: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE operations \
             SET status = $2, execution_hash = $3, outcome_unknown = FALSE, updated_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(operation_id)
        .bind(OperationStatus::Executed)
        .bind(execution_hash)
        .bind(OperationStatus::Approved)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish_execution_failure(
        &mut self,
        operation_id: Uuid,
        reason: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE operations \
             SET status = $2, failure_reason = $3, outcome_unknown = FALSE, updated_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(operation_id)
        .bind(OperationStatus::Failed)
        .bind(reason)
        .bind(OperationStatus::Approved)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_outcome_unknown(&mut self, operation_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE operations SET outcome_unknown = TRUE, updated_at = NOW() \
             WHERE id = $1 AND status = $2",
        )
        .bind(operation_id)
        .bind(OperationStatus::Approved)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_deposit(&mut self, deposit: &PendingDeposit) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO pending_deposits \
             (id, user_id, amount, order_id, status, provider_reference, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(deposit.id)
        .bind(deposit.user_id)
        .bind(deposit.amount)
        .bind(&deposit.order_id)
        .bind(deposit.status)
        .bind(&deposit.provider_reference)
        .bind(deposit.created_at)
        .bind(deposit.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn complete_deposit(
        &mut self,
        order_id: &str,
        provider_reference: Option<&str>,
    ) -> AppResult<Option<PendingDeposit>> {
        // Zero rows means the deposit already left pending: replay no-op
        let row = sqlx::query_as::<_, DepositRow>(
            "UPDATE pending_deposits \
             SET status = $2, provider_reference = COALESCE($3, provider_reference), updated_at = NOW() \
             WHERE order_id = $1 AND status = $4 \
             RETURNING id, user_id, amount, order_id, status, provider_reference, created_at, updated_at",
        )
        .bind(order_id)
        .bind(DepositStatus::Completed)
        .bind(provider_reference)
        .bind(DepositStatus::Pending)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn fail_deposit(&mut self, order_id: &str) -> AppResult<Option<PendingDeposit>> {
        let row = sqlx::query_as::<_, DepositRow>(
            "UPDATE pending_deposits SET status = $2, updated_at = NOW() \
             WHERE order_id = $1 AND status = $3 \
             RETURNING id, user_id, amount, order_id, status, provider_reference, created_at, updated_at",
        )
        .bind(order_id)
        .bind(DepositStatus::Failed)
        .bind(DepositStatus::Pending)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_withdrawal(&mut self, withdrawal: &PendingWithdrawal) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO pending_withdrawals \
             (id, user_id, amount, reference, destination, status, transaction_id, failure_reason, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(withdrawal.id)
        .bind(withdrawal.user_id)
        .bind(withdrawal.amount)
        .bind(&withdrawal.reference)
        .bind(&withdrawal.destination)
        .bind(withdrawal.status)
        .bind(&withdrawal.transaction_id)
        .bind(&withdrawal.failure_reason)
        .bind(withdrawal.created_at)
        .bind(withdrawal.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn complete_withdrawal(
        &mut self,
        reference: &str,
        transaction_id: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "UPDATE pending_withdrawals \
             SET status = $2, transaction_id = $3, updated_at = NOW() \
             WHERE reference = $1 AND status = $4 \
             RETURNING id, user_id, amount, reference, destination, status, transaction_id, \
                       failure_reason, created_at, updated_at",
        )
        .bind(reference)
        .bind(WithdrawalStatus::Completed)
        .bind(transaction_id)
        .bind(WithdrawalStatus::Pending)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn fail_withdrawal(
        &mut self,
        reference: &str,
        failure_reason: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>> {
        // The pending guard makes the refund replay-safe: a second failure
        // webhook finds no pending row and refunds nothing
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "UPDATE pending_withdrawals \
             SET status = $2, failure_reason = $3, updated_at = NOW() \
             WHERE reference = $1 AND status = $4 \
             RETURNING id, user_id, amount, reference, destination, status, transaction_id, \
                       failure_reason, created_at, updated_at",
        )
        .bind(reference)
        .bind(WithdrawalStatus::Failed)
        .bind(failure_reason)
        .bind(WithdrawalStatus::Pending)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn credit_balance(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO balances (user_id, amount, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (user_id) \
             DO UPDATE SET amount = balances.amount + EXCLUDED.amount, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn debit_balance(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE balances SET amount = amount - $2, updated_at = NOW() \
             WHERE user_id = $1 AND amount >= $2",
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_balance_amount(&mut self, user_id: Uuid) -> AppResult<Decimal> {
        let amount = sqlx::query_scalar::<_, Decimal>(
            "SELECT amount FROM balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(amount.unwrap_or(Decimal::ZERO))
    }

    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (id, user_id, kind, direction, amount, status, reference, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.kind)
        .bind(transaction.direction)
        .bind(transaction.amount)
        .bind(&transaction.status)
        .bind(&transaction.reference)
        .bind(&transaction.metadata)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

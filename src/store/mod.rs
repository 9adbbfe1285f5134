pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::accounts::models::{Balance, LedgerTransaction};
use crate::error::AppResult;
use crate::payments::models::{PendingDeposit, PendingWithdrawal};
use crate::treasury::models::Operation;

pub use memory::MemStore;
pub use postgres::PgStore;

/// Transactional store shared by every component. All balance-bearing
/// state transitions go through a [`StoreTx`] so they commit or roll back
/// as one unit.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    async fn get_operation(&self, id: Uuid) -> AppResult<Option<Operation>>;

    /// Pending operations, creation order ascending. Callers paginate.
    async fn list_pending_operations(&self) -> AppResult<Vec<Operation>>;

    async fn get_deposit_by_order(&self, order_id: &str) -> AppResult<Option<PendingDeposit>>;

    async fn get_withdrawal_by_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<PendingWithdrawal>>;

    async fn get_balance(&self, user_id: Uuid) -> AppResult<Option<Balance>>;

    async fn list_transactions(&self, user_id: Uuid) -> AppResult<Vec<LedgerTransaction>>;
}

/// One open transaction. Conditional mutations return whether a row was
/// affected (or the affected row); a miss means the precondition no longer
/// held and the caller treats it as a replay or invalid-state signal,
/// never reapplies. Dropping the handle without `commit` rolls back.
#[async_trait]
pub trait StoreTx: Send {
    // -- operations --

    async fn insert_operation(&mut self, operation: &Operation) -> AppResult<()>;

    /// Fetch an operation holding its row lock for the rest of the
    /// transaction.
    async fn operation_for_update(&mut self, id: Uuid) -> AppResult<Option<Operation>>;

    /// Record a signer vote. Returns false when the signer already voted.
    async fn add_operation_signer(&mut self, operation_id: Uuid, signer_id: &str)
        -> AppResult<bool>;

    /// Increment the signature counter, returning the new count.
    async fn bump_signature_count(&mut self, operation_id: Uuid) -> AppResult<i32>;

    /// Promote pending → approved once the quorum is met. Exactly one
    /// concurrent caller observes true.
    async fn promote_if_quorum(&mut self, operation_id: Uuid) -> AppResult<bool>;

    /// Reject a pending operation. Returns false when it is no longer
    /// pending.
    async fn mark_rejected(&mut self, operation_id: Uuid, reason: &str) -> AppResult<bool>;

    /// Take the exclusive execution claim on an approved operation.
    /// Returns false when another trigger already holds it.
    async fn claim_execution(&mut self, operation_id: Uuid) -> AppResult<bool>;

    async fn finish_execution_success(
        &mut self,
        operation_id: Uuid,
        execution_hash: &str,
    ) -> AppResult<bool>;

    async fn finish_execution_failure(
        &mut self,
        operation_id: Uuid,
        reason: &str,
    ) -> AppResult<bool>;

    /// Flag an approved operation whose external outcome is unknown.
    async fn mark_outcome_unknown(&mut self, operation_id: Uuid) -> AppResult<bool>;

    // -- deposits / withdrawals --

    async fn insert_deposit(&mut self, deposit: &PendingDeposit) -> AppResult<()>;

    /// pending → completed, returning the row that transitioned. None
    /// means the deposit already left pending (webhook replay).
    async fn complete_deposit(
        &mut self,
        order_id: &str,
        provider_reference: Option<&str>,
    ) -> AppResult<Option<PendingDeposit>>;

    async fn fail_deposit(&mut self, order_id: &str) -> AppResult<Option<PendingDeposit>>;

    async fn insert_withdrawal(&mut self, withdrawal: &PendingWithdrawal) -> AppResult<()>;

    async fn complete_withdrawal(
        &mut self,
        reference: &str,
        transaction_id: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>>;

    /// pending → failed, returning the row so the caller can refund it
    /// exactly once.
    async fn fail_withdrawal(
        &mut self,
        reference: &str,
        failure_reason: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>>;

    // -- balances / audit --

    async fn credit_balance(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<()>;

    /// Conditional debit; false when it would drive the balance negative.
    /// The check and the write are one statement, so concurrent debits
    /// cannot both pass against a stale balance.
    async fn debit_balance(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<bool>;

    async fn get_balance_amount(&mut self, user_id: Uuid) -> AppResult<Decimal>;

    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

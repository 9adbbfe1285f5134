//! In-memory implementation of the store contract.
//!
//! Transactions take the whole-state lock and stage a copy; commit swaps
//! the staged copy in, drop discards it. Access is fully serialized, so a
//! task must not issue pool-level reads while it holds an open
//! transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{StoreTx, WalletStore};
use crate::accounts::models::{Balance, LedgerTransaction};
use crate::error::{AppError, AppResult};
use crate::payments::models::{
    DepositStatus, PendingDeposit, PendingWithdrawal, WithdrawalStatus,
};
use crate::treasury::models::{Operation, OperationStatus};

#[derive(Default, Clone)]
struct MemState {
    operations: HashMap<Uuid, Operation>,
    execution_claims: HashSet<Uuid>,
    deposits: HashMap<String, PendingDeposit>,
    withdrawals: HashMap<String, PendingWithdrawal>,
    balances: HashMap<Uuid, Balance>,
    transactions: Vec<LedgerTransaction>,
}

/// Transactional in-memory store used in tests and local development
#[derive(Default, Clone)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for MemStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTx { guard, staged }))
    }

    async fn get_operation(&self, id: Uuid) -> AppResult<Option<Operation>> {
        Ok(self.state.lock().await.operations.get(&id).cloned())
    }

    async fn list_pending_operations(&self) -> AppResult<Vec<Operation>> {
        let state = self.state.lock().await;
        let mut pending: Vec<Operation> = state
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|op| op.created_at);
        Ok(pending)
    }

    async fn get_deposit_by_order(&self, order_id: &str) -> AppResult<Option<PendingDeposit>> {
        Ok(self.state.lock().await.deposits.get(order_id).cloned())
    }

    async fn get_withdrawal_by_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<PendingWithdrawal>> {
        Ok(self.state.lock().await.withdrawals.get(reference).cloned())
    }

    async fn get_balance(&self, user_id: Uuid) -> AppResult<Option<Balance>> {
        Ok(self.state.lock().await.balances.get(&user_id).cloned())
    }

    async fn list_transactions(&self, user_id: Uuid) -> AppResult<Vec<LedgerTransaction>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LedgerTransaction> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(rows)
    }
}

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    staged: MemState,
}

impl MemTx {
    fn operation_mut(&mut self, id: Uuid) -> AppResult<&mut Operation> {
        self.staged
            .operations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("operation {}", id)))
    }
}

#[async_trait]
impl StoreTx for MemTx {
    async fn insert_operation(&mut self, operation: &Operation) -> AppResult<()> {
        self.staged
            .operations
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn operation_for_update(&mut self, id: Uuid) -> AppResult<Option<Operation>> {
        Ok(self.staged.operations.get(&id).cloned())
    }

    async fn add_operation_signer(
        &mut self,
        operation_id: Uuid,
        signer_id: &str,
    ) -> AppResult<bool> {
        let op = self.operation_mut(operation_id)?;
        if op.signers.iter().any(|s| s == signer_id) {
            return Ok(false);
        }
        op.signers.push(signer_id.to_string());
        op.updated_at = Utc::now();
        Ok(true)
    }

    async fn bump_signature_count(&mut self, operation_id: Uuid) -> AppResult<i32> {
        let op = self.operation_mut(operation_id)?;
        op.current_signatures += 1;
        op.updated_at = Utc::now();
        Ok(op.current_signatures)
    }

    async fn promote_if_quorum(&mut self, operation_id: Uuid) -> AppResult<bool> {
        let op = self.operation_mut(operation_id)?;
        if op.status == OperationStatus::Pending && op.current_signatures >= op.required_signatures
        {
            op.status = OperationStatus::Approved;
            op.updated_at = Utc::now();
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_rejected(&mut self, operation_id: Uuid, reason: &str) -> AppResult<bool> {
        let op = self.operation_mut(operation_id)?;
        if op.status != OperationStatus::Pending {
            return Ok(false);
        }
        op.status = OperationStatus::Rejected;
        op.failure_reason = Some(reason.to_string());
        op.updated_at = Utc::now();
        Ok(true)
    }

    async fn claim_execution(&mut self, operation_id: Uuid) -> AppResult<bool> {
        let claimed = self.staged.execution_claims.contains(&operation_id);
        let op = self.operation_mut(operation_id)?;
        if op.status != OperationStatus::Approved || claimed {
            return Ok(false);
        }
        self.staged.execution_claims.insert(operation_id);
        Ok(true)
    }

    async fn finish_execution_success(
        &mut self,
        operation_id: Uuid,
        execution_hash: &str,
    ) -> AppResult<bool> {
        let op = self.operation_mut(operation_id)?;
        if op.status != OperationStatus::Approved {
            return Ok(false);
        }
        op.status = OperationStatus::Executed;
        op.execution_hash = Some(execution_hash.to_string());
        op.outcome_unknown = false;
        op.updated_at = Utc::now();
        Ok(true)
    }

    async fn finish_execution_failure(
        &mut self,
        operation_id: Uuid,
        reason: &str,
    ) -> AppResult<bool> {
        let op = self.operation_mut(operation_id)?;
        if op.status != OperationStatus::Approved {
            return Ok(false);
        }
        op.status = OperationStatus::Failed;
        op.failure_reason = Some(reason.to_string());
        op.outcome_unknown = false;
        op.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_outcome_unknown(&mut self, operation_id: Uuid) -> AppResult<bool> {
        let op = self.operation_mut(operation_id)?;
        if op.status != OperationStatus::Approved {
            return Ok(false);
        }
        op.outcome_unknown = true;
        op.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_deposit(&mut self, deposit: &PendingDeposit) -> AppResult<()> {
        if self.staged.deposits.contains_key(&deposit.order_id) {
            return Err(AppError::InvalidRequest(format!(
                "duplicate order id {}",
                deposit.order_id
            )));
        }
        self.staged
            .deposits
            .insert(deposit.order_id.clone(), deposit.clone());
        Ok(())
    }

    async fn complete_deposit(
        &mut self,
        order_id: &str,
        provider_reference: Option<&str>,
    ) -> AppResult<Option<PendingDeposit>> {
        match self.staged.deposits.get_mut(order_id) {
            Some(deposit) if deposit.status == DepositStatus::Pending => {
                deposit.status = DepositStatus::Completed;
                deposit.provider_reference = provider_reference.map(str::to_string);
                deposit.updated_at = Utc::now();
                Ok(Some(deposit.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fail_deposit(&mut self, order_id: &str) -> AppResult<Option<PendingDeposit>> {
        match self.staged.deposits.get_mut(order_id) {
            Some(deposit) if deposit.status == DepositStatus::Pending => {
                deposit.status = DepositStatus::Failed;
                deposit.updated_at = Utc::now();
                Ok(Some(deposit.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_withdrawal(&mut self, withdrawal: &PendingWithdrawal) -> AppResult<()> {
        if self.staged.withdrawals.contains_key(&withdrawal.reference) {
            return Err(AppError::InvalidRequest(format!(
                "duplicate withdrawal reference {}",
                withdrawal.reference
            )));
        }
        self.staged
            .withdrawals
            .insert(withdrawal.reference.clone(), withdrawal.clone());
        Ok(())
    }

    async fn complete_withdrawal(
        &mut self,
        reference: &str,
        transaction_id: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>> {
        match self.staged.withdrawals.get_mut(reference) {
            Some(withdrawal) if withdrawal.status == WithdrawalStatus::Pending => {
                withdrawal.status = WithdrawalStatus::Completed;
                withdrawal.transaction_id = transaction_id.map(str::to_string);
                withdrawal.updated_at = Utc::now();
                Ok(Some(withdrawal.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fail_withdrawal(
        &mut self,
        reference: &str,
        failure_reason: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>> {
        match self.staged.withdrawals.get_mut(reference) {
            Some(withdrawal) if withdrawal.status == WithdrawalStatus::Pending => {
                withdrawal.status = WithdrawalStatus::Failed;
                withdrawal.failure_reason = failure_reason.map(str::to_string);
                withdrawal.updated_at = Utc::now();
                Ok(Some(withdrawal.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn credit_balance(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<()> {
        let entry = self.staged.balances.entry(user_id).or_insert(Balance {
            user_id,
            amount: Decimal::ZERO,
            updated_at: Utc::now(),
        });
        entry.amount += amount;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn debit_balance(&mut self, user_id: Uuid, amount: Decimal) -> AppResult<bool> {
        match self.staged.balances.get_mut(&user_id) {
            Some(balance) if balance.amount >= amount => {
                balance.amount -= amount;
                balance.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_balance_amount(&mut self, user_id: Uuid) -> AppResult<Decimal> {
        Ok(self
            .staged
            .balances
            .get(&user_id)
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO))
    }

    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> AppResult<()> {
        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treasury::models::OperationKind;
    use rust_decimal_macros::dec;

    fn mint_op(required: i32) -> Operation {
        Operation::new(
            OperationKind::Mint {
                amount: dec!(100),
                destination: "GDEST".to_string(),
                user_id: None,
                reference: None,
            },
            required,
        )
    }

    #[tokio::test]
    async fn uncommitted_transaction_rolls_back() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        {
            let mut tx = store.begin().await.unwrap();
            tx.credit_balance(user, dec!(50)).await.unwrap();
            // dropped without commit
        }
        assert!(store.get_balance(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn promote_if_quorum_has_single_winner() {
        let store = MemStore::new();
        let op = mint_op(1);
        let mut tx = store.begin().await.unwrap();
        tx.insert_operation(&op).await.unwrap();
        tx.bump_signature_count(op.id).await.unwrap();
        assert!(tx.promote_if_quorum(op.id).await.unwrap());
        assert!(!tx.promote_if_quorum(op.id).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn execution_claim_is_exclusive() {
        let store = MemStore::new();
        let mut op = mint_op(1);
        op.status = OperationStatus::Approved;
        let mut tx = store.begin().await.unwrap();
        tx.insert_operation(&op).await.unwrap();
        assert!(tx.claim_execution(op.id).await.unwrap());
        assert!(!tx.claim_execution(op.id).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn complete_deposit_moves_once() {
        let store = MemStore::new();
        let deposit = PendingDeposit::new(Uuid::new_v4(), dec!(25));
        let mut tx = store.begin().await.unwrap();
        tx.insert_deposit(&deposit).await.unwrap();
        assert!(tx
            .complete_deposit(&deposit.order_id, Some("ref-1"))
            .await
            .unwrap()
            .is_some());
        assert!(tx
            .complete_deposit(&deposit.order_id, Some("ref-1"))
            .await
            .unwrap()
            .is_none());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn debit_cannot_go_negative() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.credit_balance(user, dec!(10)).await.unwrap();
        assert!(!tx.debit_balance(user, dec!(11)).await.unwrap());
        assert!(tx.debit_balance(user, dec!(10)).await.unwrap());
        assert_eq!(tx.get_balance_amount(user).await.unwrap(), dec!(0));
        tx.commit().await.unwrap();
    }
}

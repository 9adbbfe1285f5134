use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use super::dispatcher::ExecutionDispatcher;
use super::models::{Operation, OperationStatus};
use super::verify::SignerVerifier;
use crate::error::{AppError, AppResult};
use crate::store::WalletStore;

/// Receives the quorum-reached handoff. The approval transaction commits
/// before the trigger fires, so an observer never sees an approved
/// operation without execution having been scheduled.
pub trait ExecutionTrigger: Send + Sync {
    fn quorum_reached(&self, operation_id: Uuid);
}

/// Production trigger: runs the dispatcher on a background task.
pub struct SpawnedExecution {
    dispatcher: Arc<ExecutionDispatcher>,
}

impl SpawnedExecution {
    pub fn new(dispatcher: Arc<ExecutionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl ExecutionTrigger for SpawnedExecution {
    fn quorum_reached(&self, operation_id: Uuid) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.execute(operation_id).await {
                error!(operation_id = %operation_id, "execution after quorum failed: {:?}", e);
            }
        });
    }
}

/// Collects approval votes and promotes an operation once the quorum
/// threshold is met. One vote per signer; exactly one racing approval wins
/// the handoff to execution.
pub struct QuorumApprovalEngine {
    store: Arc<dyn WalletStore>,
    verifier: Arc<dyn SignerVerifier>,
    trigger: Arc<dyn ExecutionTrigger>,
}

impl QuorumApprovalEngine {
    pub fn new(
        store: Arc<dyn WalletStore>,
        verifier: Arc<dyn SignerVerifier>,
        trigger: Arc<dyn ExecutionTrigger>,
    ) -> Self {
        Self {
            store,
            verifier,
            trigger,
        }
    }

    pub async fn approve(
        &self,
        operation_id: Uuid,
        signer_id: &str,
        credential: Option<&str>,
    ) -> AppResult<Operation> {
        if signer_id.is_empty() {
            return Err(AppError::InvalidRequest(
                "signer_id must not be empty".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        let mut operation = tx
            .operation_for_update(operation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))?;

        if operation.status != OperationStatus::Pending {
            // Once quorum is reached the operation belongs to the
            // dispatcher; no further votes are accepted
            return Err(AppError::invalid_state(
                operation.status.as_str(),
                OperationStatus::Pending.as_str(),
            ));
        }

        self.verifier.verify(&operation, signer_id, credential)?;

        if !tx.add_operation_signer(operation_id, signer_id).await? {
            // Replay of an accepted vote: benign no-op for at-least-once
            // callers, state unchanged
            debug!(
                operation_id = %operation_id,
                signer_id,
                "duplicate approval ignored"
            );
            return Ok(operation);
        }

        let count = tx.bump_signature_count(operation_id).await?;
        let quorum_won = tx.promote_if_quorum(operation_id).await?;
        tx.commit().await?;

        operation.signers.push(signer_id.to_string());
        operation.current_signatures = count;
        if quorum_won {
            operation.status = OperationStatus::Approved;
        }

        info!(
            operation_id = %operation_id,
            signer_id,
            current_signatures = count,
            required_signatures = operation.required_signatures,
            quorum_reached = quorum_won,
            "approval recorded"
        );

        if quorum_won {
            self.trigger.quorum_reached(operation_id);
        }

        Ok(operation)
    }

    /// Explicit rejection of a pending operation; terminal.
    pub async fn reject(&self, operation_id: Uuid, reason: &str) -> AppResult<Operation> {
        let mut tx = self.store.begin().await?;

        let operation = tx
            .operation_for_update(operation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))?;

        if !tx.mark_rejected(operation_id, reason).await? {
            return Err(AppError::invalid_state(
                operation.status.as_str(),
                OperationStatus::Pending.as_str(),
            ));
        }
        tx.commit().await?;

        info!(operation_id = %operation_id, reason, "operation rejected");

        self.store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::accountant::LedgerAccountant;
    use crate::chain::{LedgerTx, SubmitReceipt, TokenLedger};
    use crate::error::AppResult;
    use crate::store::MemStore;
    use crate::treasury::models::OperationKind;
    use crate::treasury::operations::OperationLedger;
    use crate::treasury::verify::TrustedRoster;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records quorum handoffs instead of spawning
    #[derive(Default)]
    struct RecordingTrigger {
        fired: Mutex<Vec<Uuid>>,
    }

    impl ExecutionTrigger for RecordingTrigger {
        fn quorum_reached(&self, operation_id: Uuid) {
            self.fired.lock().unwrap().push(operation_id);
        }
    }

    struct CountingLedger {
        submissions: AtomicUsize,
    }

    #[async_trait]
    impl TokenLedger for CountingLedger {
        async fn submit(&self, _tx: LedgerTx) -> AppResult<SubmitReceipt> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(SubmitReceipt {
                hash: "0xABC".to_string(),
            })
        }

        async fn query_balance(&self, _address: &str, _asset: &str) -> AppResult<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    fn engine_with(
        store: Arc<MemStore>,
        trigger: Arc<dyn ExecutionTrigger>,
    ) -> QuorumApprovalEngine {
        QuorumApprovalEngine::new(
            store,
            Arc::new(TrustedRoster::new(Vec::new())),
            trigger,
        )
    }

    fn mint_kind() -> OperationKind {
        OperationKind::Mint {
            amount: dec!(100),
            destination: "GDEST".to_string(),
            user_id: None,
            reference: None,
        }
    }

    #[tokio::test]
    async fn quorum_of_two_promotes_on_second_vote() {
        let store = Arc::new(MemStore::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let operations = OperationLedger::new(store.clone());
        let engine = engine_with(store.clone(), trigger.clone());

        let op = operations.create(mint_kind(), 2).await.unwrap();

        let after_a = engine.approve(op.id, "signer-a", None).await.unwrap();
        assert_eq!(after_a.current_signatures, 1);
        assert_eq!(after_a.status, OperationStatus::Pending);
        assert!(trigger.fired.lock().unwrap().is_empty());

        let after_b = engine.approve(op.id, "signer-b", None).await.unwrap();
        assert_eq!(after_b.current_signatures, 2);
        assert_eq!(after_b.status, OperationStatus::Approved);
        assert_eq!(trigger.fired.lock().unwrap().as_slice(), &[op.id]);
    }

    #[tokio::test]
    async fn duplicate_signer_is_a_benign_no_op() {
        let store = Arc::new(MemStore::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let operations = OperationLedger::new(store.clone());
        let engine = engine_with(store.clone(), trigger.clone());

        let op = operations.create(mint_kind(), 2).await.unwrap();

        let first = engine.approve(op.id, "signer-a", None).await.unwrap();
        assert_eq!(first.current_signatures, 1);

        // retried approve call: same state back, no error escalation
        let second = engine.approve(op.id, "signer-a", None).await.unwrap();
        assert_eq!(second.current_signatures, 1);
        assert_eq!(second.signers, vec!["signer-a".to_string()]);
        assert_eq!(second.status, OperationStatus::Pending);
        assert!(trigger.fired.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approving_non_pending_operation_fails() {
        let store = Arc::new(MemStore::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let operations = OperationLedger::new(store.clone());
        let engine = engine_with(store.clone(), trigger.clone());

        let op = operations.create(mint_kind(), 1).await.unwrap();
        engine.approve(op.id, "signer-a", None).await.unwrap();

        let err = engine.approve(op.id, "signer-b", None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Treasury(crate::error::TreasuryError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let store = Arc::new(MemStore::new());
        let engine = engine_with(store, Arc::new(RecordingTrigger::default()));
        let err = engine
            .approve(Uuid::new_v4(), "signer-a", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn signature_count_always_matches_distinct_signers() {
        let store = Arc::new(MemStore::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let operations = OperationLedger::new(store.clone());
        let engine = engine_with(store.clone(), trigger);

        let op = operations.create(mint_kind(), 5).await.unwrap();
        for signer in ["a", "b", "a", "c", "b", "a"] {
            let state = engine.approve(op.id, signer, None).await.unwrap();
            assert_eq!(state.current_signatures as usize, state.signers.len());
        }
        let final_state = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(final_state.current_signatures, 3);
        assert_eq!(final_state.signers.len(), 3);
    }

    #[tokio::test]
    async fn racing_approvals_trigger_exactly_one_execution() {
        let store = Arc::new(MemStore::new());
        let ledger = Arc::new(CountingLedger {
            submissions: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            store.clone(),
            ledger.clone(),
            Arc::new(LedgerAccountant::new()),
            "GISSUER".to_string(),
            "USDX".to_string(),
            Duration::from_secs(5),
        ));
        let operations = OperationLedger::new(store.clone());
        let engine = Arc::new(engine_with(
            store.clone(),
            Arc::new(SpawnedExecution::new(dispatcher.clone())),
        ));

        let required = 4;
        let op = operations.create(mint_kind(), required).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..required {
            let engine = engine.clone();
            let id = op.id;
            handles.push(tokio::spawn(async move {
                engine.approve(id, &format!("signer-{}", i), None).await
            }));
        }
        for handle in handles {
            // every vote is either accepted or a recognized benign error
            let _ = handle.await.unwrap();
        }

        // let the spawned execution finish
        for _ in 0..50 {
            let op = store.get_operation(op.id).await.unwrap().unwrap();
            if op.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);
        let final_state = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(final_state.status, OperationStatus::Executed);
        assert_eq!(final_state.execution_hash.as_deref(), Some("0xABC"));
    }

    #[tokio::test]
    async fn reject_is_terminal_and_pending_only() {
        let store = Arc::new(MemStore::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let operations = OperationLedger::new(store.clone());
        let engine = engine_with(store.clone(), trigger);

        let op = operations.create(mint_kind(), 2).await.unwrap();
        let rejected = engine.reject(op.id, "compliance hold").await.unwrap();
        assert_eq!(rejected.status, OperationStatus::Rejected);
        assert_eq!(rejected.failure_reason.as_deref(), Some("compliance hold"));

        let err = engine.reject(op.id, "again").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Treasury(crate::error::TreasuryError::InvalidState { .. })
        ));
        let err = engine.approve(op.id, "signer-a", None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Treasury(crate::error::TreasuryError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn roster_blocks_unknown_signers() {
        let store = Arc::new(MemStore::new());
        let operations = OperationLedger::new(store.clone());
        let engine = QuorumApprovalEngine::new(
            store.clone(),
            Arc::new(TrustedRoster::new(vec!["alice".to_string()])),
            Arc::new(RecordingTrigger::default()),
        );

        let op = operations.create(mint_kind(), 1).await.unwrap();
        let err = engine.approve(op.id, "mallory", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential(_)));
        let state = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(state.current_signatures, 0);
    }
}

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::models::{Operation, OperationKind};
use crate::error::{AppError, AppResult};
use crate::store::WalletStore;

/// Persists and versions treasury operations. Leaf dependency for the
/// approval flow; terminal operations are retained for audit, never
/// deleted.
pub struct OperationLedger {
    store: Arc<dyn WalletStore>,
}

impl OperationLedger {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        kind: OperationKind,
        required_signatures: i32,
    ) -> AppResult<Operation> {
        if required_signatures < 1 {
            return Err(AppError::InvalidRequest(
                "required_signatures must be at least 1".to_string(),
            ));
        }
        kind.validate()?;

        let operation = Operation::new(kind, required_signatures);

        let mut tx = self.store.begin().await?;
        tx.insert_operation(&operation).await?;
        tx.commit().await?;

        info!(
            operation_id = %operation.id,
            op_type = ?operation.kind.op_type(),
            required_signatures,
            "treasury operation created"
        );

        Ok(operation)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Operation> {
        self.store
            .get_operation(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", id)))
    }

    /// Pending operations in creation order; callers paginate.
    pub async fn list_pending(&self) -> AppResult<Vec<Operation>> {
        self.store.list_pending_operations().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::treasury::models::{OperationStatus, OperationType};
    use rust_decimal_macros::dec;

    fn ledger() -> OperationLedger {
        OperationLedger::new(Arc::new(MemStore::new()))
    }

    fn mint_kind() -> OperationKind {
        OperationKind::Mint {
            amount: dec!(500),
            destination: "GDEST".to_string(),
            user_id: None,
            reference: None,
        }
    }

    #[tokio::test]
    async fn create_starts_pending_with_zero_signatures() {
        let ledger = ledger();
        let op = ledger.create(mint_kind(), 2).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.current_signatures, 0);
        assert!(op.signers.is_empty());
        assert!(op.execution_hash.is_none());

        let fetched = ledger.get(op.id).await.unwrap();
        assert_eq!(fetched.id, op.id);
        assert_eq!(fetched.kind.op_type(), OperationType::Mint);
    }

    #[tokio::test]
    async fn create_rejects_zero_quorum() {
        let err = ledger().create(mint_kind(), 0).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let err = ledger().get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_pending_is_creation_ordered() {
        let ledger = ledger();
        let first = ledger.create(mint_kind(), 1).await.unwrap();
        let second = ledger.create(mint_kind(), 1).await.unwrap();
        let pending = ledger.list_pending().await.unwrap();
        assert_eq!(
            pending.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }
}

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{
    DepositStatus, PaymentStatus, PaymentWebhookPayload, PendingDeposit, PendingWithdrawal,
    WithdrawalStatus,
};
use super::provider::PaymentProvider;
use crate::accounts::accountant::LedgerAccountant;
use crate::accounts::models::{Direction, TransactionKind};
use crate::error::{AppError, AppResult, PaymentError};
use crate::store::WalletStore;

/// How a webhook delivery was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// First delivery: the record transitioned and any balance effect
    /// was applied
    Processed,
    /// The record had already left pending; nothing was reapplied
    Replayed,
    /// Non-terminal provider status; nothing to do yet
    Ignored,
}

/// Drives PendingDeposit/PendingWithdrawal records to a terminal state
/// exactly once under at-least-once, unordered webhook delivery. Every
/// transition is a conditional update keyed on the pending status, so a
/// replay finds no row to move and applies no balance effect.
pub struct PaymentReconciler {
    store: Arc<dyn WalletStore>,
    accountant: Arc<LedgerAccountant>,
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn WalletStore>,
        accountant: Arc<LedgerAccountant>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            store,
            accountant,
            provider,
        }
    }

    // ========== INITIATION ==========

    pub async fn initiate_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
    ) -> AppResult<PendingDeposit> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "Deposit amount must be positive".to_string(),
            ));
        }

        let deposit = PendingDeposit::new(user_id, amount);

        // Persist before contacting the provider so an early webhook
        // always finds the order
        let mut tx = self.store.begin().await?;
        tx.insert_deposit(&deposit).await?;
        tx.commit().await?;

        match self
            .provider
            .initiate_payment(&deposit.order_id, amount, &user_id.to_string())
            .await
        {
            Ok(initiation) => {
                info!(
                    order_id = %deposit.order_id,
                    user_id = %user_id,
                    amount = %amount,
                    provider_status = %initiation.status,
                    "deposit initiated"
                );
                Ok(deposit)
            }
            Err(e) => {
                let mut tx = self.store.begin().await?;
                tx.fail_deposit(&deposit.order_id).await?;
                tx.commit().await?;
                Err(e)
            }
        }
    }

    /// Debits the balance up front; only a failure webhook credits it
    /// back.
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        destination: &str,
    ) -> AppResult<PendingWithdrawal> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "Withdrawal amount must be positive".to_string(),
            ));
        }
        if destination.is_empty() {
            return Err(AppError::InvalidRequest(
                "Withdrawal destination must not be empty".to_string(),
            ));
        }

        let withdrawal = PendingWithdrawal::new(user_id, amount, destination.to_string());

        let mut tx = self.store.begin().await?;
        self.accountant
            .apply_transaction(
                &mut *tx,
                user_id,
                TransactionKind::Withdrawal,
                Direction::Debit,
                amount,
                Some(&withdrawal.reference),
                serde_json::json!({ "destination": destination }),
            )
            .await?;
        tx.insert_withdrawal(&withdrawal).await?;
        tx.commit().await?;

        if let Err(e) = self
            .provider
            .initiate_payout(&withdrawal.reference, amount, destination)
            .await
        {
            // Payout never started: fail the record and refund through
            // the same guarded path a failure webhook would take
            self.refund_failed_withdrawal(&withdrawal.reference, Some("payout initiation failed"))
                .await?;
            return Err(e);
        }

        info!(
            reference = %withdrawal.reference,
            user_id = %user_id,
            amount = %amount,
            "withdrawal requested"
        );

        Ok(withdrawal)
    }

    // ========== WEBHOOKS ==========

    pub async fn handle_deposit_webhook(
        &self,
        payload: &PaymentWebhookPayload,
    ) -> AppResult<WebhookDisposition> {
        let order_id = payload
            .order_id
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("missing order_id".to_string()))?;

        let deposit = self
            .store
            .get_deposit_by_order(order_id)
            .await?
            .ok_or_else(|| {
                // Expected under provider retries for foreign or purged
                // orders; logged, not escalated
                AppError::Payment(PaymentError::UnknownReference(order_id.to_string()))
            })?;

        // Fast path for replays; the conditional updates below are the
        // actual guard against a concurrent first delivery
        if deposit.status != DepositStatus::Pending {
            return Ok(WebhookDisposition::Replayed);
        }

        match payload.payment_status {
            PaymentStatus::Pending => Ok(WebhookDisposition::Ignored),
            PaymentStatus::Completed => {
                let mut tx = self.store.begin().await?;
                let Some(completed) = tx
                    .complete_deposit(order_id, payload.transaction_id.as_deref())
                    .await?
                else {
                    // Replay: already completed or failed, credit nothing
                    info!(order_id, "deposit webhook replay ignored");
                    return Ok(WebhookDisposition::Replayed);
                };

                self.accountant
                    .apply_transaction(
                        &mut *tx,
                        completed.user_id,
                        TransactionKind::Deposit,
                        Direction::Credit,
                        completed.amount,
                        Some(order_id),
                        serde_json::json!({
                            "provider_reference": completed.provider_reference,
                        }),
                    )
                    .await?;
                tx.commit().await?;

                info!(
                    order_id,
                    user_id = %completed.user_id,
                    amount = %completed.amount,
                    "deposit completed and credited"
                );
                Ok(WebhookDisposition::Processed)
            }
            PaymentStatus::Failed => {
                let mut tx = self.store.begin().await?;
                let failed = tx.fail_deposit(order_id).await?;
                tx.commit().await?;

                match failed {
                    Some(_) => {
                        // No balance was ever applied for a deposit, so
                        // failure has no refund leg
                        warn!(order_id, reason = ?payload.failure_reason, "deposit failed");
                        Ok(WebhookDisposition::Processed)
                    }
                    None => Ok(WebhookDisposition::Replayed),
                }
            }
        }
    }

    pub async fn handle_withdrawal_webhook(
        &self,
        payload: &PaymentWebhookPayload,
    ) -> AppResult<WebhookDisposition> {
        let reference = payload
            .reference
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("missing reference".to_string()))?;

        let withdrawal = self
            .store
            .get_withdrawal_by_reference(reference)
            .await?
            .ok_or_else(|| {
                AppError::Payment(PaymentError::UnknownReference(reference.to_string()))
            })?;

        if withdrawal.status != WithdrawalStatus::Pending {
            return Ok(WebhookDisposition::Replayed);
        }

        match payload.payment_status {
            PaymentStatus::Pending => Ok(WebhookDisposition::Ignored),
            PaymentStatus::Completed => {
                let mut tx = self.store.begin().await?;
                let completed = tx
                    .complete_withdrawal(reference, payload.transaction_id.as_deref())
                    .await?;
                tx.commit().await?;

                match completed {
                    Some(w) => {
                        // The debit already happened at request time
                        info!(reference, user_id = %w.user_id, "withdrawal completed");
                        Ok(WebhookDisposition::Processed)
                    }
                    None => Ok(WebhookDisposition::Replayed),
                }
            }
            PaymentStatus::Failed => {
                match self
                    .refund_failed_withdrawal(reference, payload.failure_reason.as_deref())
                    .await?
                {
                    Some(w) => {
                        warn!(
                            reference,
                            user_id = %w.user_id,
                            amount = %w.amount,
                            reason = ?payload.failure_reason,
                            "withdrawal failed, amount refunded"
                        );
                        Ok(WebhookDisposition::Processed)
                    }
                    None => Ok(WebhookDisposition::Replayed),
                }
            }
        }
    }

    /// pending → failed plus the refund credit, one transaction. The
    /// pending guard means a replayed failure webhook refunds nothing.
    async fn refund_failed_withdrawal(
        &self,
        reference: &str,
        failure_reason: Option<&str>,
    ) -> AppResult<Option<PendingWithdrawal>> {
        let mut tx = self.store.begin().await?;
        let Some(failed) = tx.fail_withdrawal(reference, failure_reason).await? else {
            return Ok(None);
        };

        self.accountant
            .apply_transaction(
                &mut *tx,
                failed.user_id,
                TransactionKind::Withdrawal,
                Direction::Credit,
                failed.amount,
                Some(reference),
                serde_json::json!({
                    "refund": true,
                    "failure_reason": failure_reason,
                }),
            )
            .await?;
        tx.commit().await?;

        Ok(Some(failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::models::DepositStatus;
    use crate::payments::models::WithdrawalStatus;
    use crate::payments::provider::PaymentInitiation;
    use crate::store::MemStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct StubProvider {
        fail_payout: bool,
    }

    #[async_trait]
    impl PaymentProvider for StubProvider {
        async fn initiate_payment(
            &self,
            _order_id: &str,
            _amount: Decimal,
            _payer: &str,
        ) -> AppResult<PaymentInitiation> {
            Ok(PaymentInitiation {
                status: "PENDING".to_string(),
                provider_reference: Some("sess-1".to_string()),
            })
        }

        async fn initiate_payout(
            &self,
            _reference: &str,
            _amount: Decimal,
            _destination: &str,
        ) -> AppResult<PaymentInitiation> {
            if self.fail_payout {
                Err(AppError::ExternalFailure("provider down".to_string()))
            } else {
                Ok(PaymentInitiation {
                    status: "PENDING".to_string(),
                    provider_reference: None,
                })
            }
        }
    }

    fn reconciler_with(store: Arc<MemStore>, fail_payout: bool) -> PaymentReconciler {
        PaymentReconciler::new(
            store,
            Arc::new(LedgerAccountant::new()),
            Arc::new(StubProvider { fail_payout }),
        )
    }

    fn completed_webhook(order_id: &str) -> PaymentWebhookPayload {
        PaymentWebhookPayload {
            order_id: Some(order_id.to_string()),
            reference: None,
            payment_status: PaymentStatus::Completed,
            transaction_id: Some("prov-tx-1".to_string()),
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn deposit_success_credits_exactly_once_across_replays() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), false);
        let user = Uuid::new_v4();

        let deposit = reconciler.initiate_deposit(user, dec!(1000)).await.unwrap();
        assert_eq!(
            store.get_balance(user).await.unwrap().map(|b| b.amount),
            None
        );

        let webhook = completed_webhook(&deposit.order_id);
        assert_eq!(
            reconciler.handle_deposit_webhook(&webhook).await.unwrap(),
            WebhookDisposition::Processed
        );
        assert_eq!(
            reconciler.handle_deposit_webhook(&webhook).await.unwrap(),
            WebhookDisposition::Replayed
        );

        // balance ends at 1000, not 2000
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(1000)
        );
        let resolved = store
            .get_deposit_by_order(&deposit.order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.status, DepositStatus::Completed);
        assert_eq!(store.list_transactions(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_deposit_replays_credit_once() {
        let store = Arc::new(MemStore::new());
        let reconciler = Arc::new(reconciler_with(store.clone(), false));
        let user = Uuid::new_v4();
        let deposit = reconciler.initiate_deposit(user, dec!(300)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            let webhook = completed_webhook(&deposit.order_id);
            handles.push(tokio::spawn(async move {
                reconciler.handle_deposit_webhook(&webhook).await
            }));
        }
        let mut processed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == WebhookDisposition::Processed {
                processed += 1;
            }
        }

        assert_eq!(processed, 1);
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(300)
        );
    }

    #[tokio::test]
    async fn unknown_order_is_rejected_without_state_change() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store, false);
        let err = reconciler
            .handle_deposit_webhook(&completed_webhook("ord-unknown"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Payment(PaymentError::UnknownReference(_))
        ));
    }

    #[tokio::test]
    async fn deposit_failure_sets_failed_without_credit() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), false);
        let user = Uuid::new_v4();
        let deposit = reconciler.initiate_deposit(user, dec!(50)).await.unwrap();

        let webhook = PaymentWebhookPayload {
            order_id: Some(deposit.order_id.clone()),
            reference: None,
            payment_status: PaymentStatus::Failed,
            transaction_id: None,
            failure_reason: Some("card declined".to_string()),
        };
        assert_eq!(
            reconciler.handle_deposit_webhook(&webhook).await.unwrap(),
            WebhookDisposition::Processed
        );
        assert!(store.get_balance(user).await.unwrap().is_none());
        assert_eq!(
            store
                .get_deposit_by_order(&deposit.order_id)
                .await
                .unwrap()
                .unwrap()
                .status,
            DepositStatus::Failed
        );

        // a success webhook arriving after failure must not credit
        assert_eq!(
            reconciler
                .handle_deposit_webhook(&completed_webhook(&deposit.order_id))
                .await
                .unwrap(),
            WebhookDisposition::Replayed
        );
        assert!(store.get_balance(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn withdrawal_request_debits_up_front() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), false);
        let user = Uuid::new_v4();

        // seed balance
        let mut tx = store.begin().await.unwrap();
        tx.credit_balance(user, dec!(500)).await.unwrap();
        tx.commit().await.unwrap();

        let withdrawal = reconciler
            .request_withdrawal(user, dec!(500), "+254700000001")
            .await
            .unwrap();
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(0)
        );
        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    }

    #[tokio::test]
    async fn withdrawal_shortfall_is_rejected() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), false);
        let user = Uuid::new_v4();

        let err = reconciler
            .request_withdrawal(user, dec!(10), "+254700000001")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn withdrawal_failure_refunds_exactly_once_across_replays() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), false);
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.credit_balance(user, dec!(500)).await.unwrap();
        tx.commit().await.unwrap();

        let withdrawal = reconciler
            .request_withdrawal(user, dec!(500), "+254700000001")
            .await
            .unwrap();
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(0)
        );

        let webhook = PaymentWebhookPayload {
            order_id: None,
            reference: Some(withdrawal.reference.clone()),
            payment_status: PaymentStatus::Failed,
            transaction_id: None,
            failure_reason: Some("insufficient funds at provider".to_string()),
        };
        assert_eq!(
            reconciler.handle_withdrawal_webhook(&webhook).await.unwrap(),
            WebhookDisposition::Processed
        );
        assert_eq!(
            reconciler.handle_withdrawal_webhook(&webhook).await.unwrap(),
            WebhookDisposition::Replayed
        );

        // refunded once: 500, not 1000
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(500)
        );
        let resolved = store
            .get_withdrawal_by_reference(&withdrawal.reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.status, WithdrawalStatus::Failed);
        assert_eq!(
            resolved.failure_reason.as_deref(),
            Some("insufficient funds at provider")
        );
    }

    #[tokio::test]
    async fn concurrent_withdrawal_failure_replays_refund_once() {
        let store = Arc::new(MemStore::new());
        let reconciler = Arc::new(reconciler_with(store.clone(), false));
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.credit_balance(user, dec!(500)).await.unwrap();
        tx.commit().await.unwrap();

        let withdrawal = reconciler
            .request_withdrawal(user, dec!(500), "+254700000001")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            let webhook = PaymentWebhookPayload {
                order_id: None,
                reference: Some(withdrawal.reference.clone()),
                payment_status: PaymentStatus::Failed,
                transaction_id: None,
                failure_reason: Some("provider rejected payout".to_string()),
            };
            handles.push(tokio::spawn(async move {
                reconciler.handle_withdrawal_webhook(&webhook).await
            }));
        }
        let mut processed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == WebhookDisposition::Processed {
                processed += 1;
            }
        }

        // one racing delivery wins the pending guard; the refund lands once
        assert_eq!(processed, 1);
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(500)
        );
        assert_eq!(
            store
                .get_withdrawal_by_reference(&withdrawal.reference)
                .await
                .unwrap()
                .unwrap()
                .status,
            WithdrawalStatus::Failed
        );
    }

    #[tokio::test]
    async fn withdrawal_success_records_transaction_id_without_balance_effect() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), false);
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.credit_balance(user, dec!(200)).await.unwrap();
        tx.commit().await.unwrap();

        let withdrawal = reconciler
            .request_withdrawal(user, dec!(150), "+254700000001")
            .await
            .unwrap();

        let webhook = PaymentWebhookPayload {
            order_id: None,
            reference: Some(withdrawal.reference.clone()),
            payment_status: PaymentStatus::Completed,
            transaction_id: Some("prov-tx-7".to_string()),
            failure_reason: None,
        };
        assert_eq!(
            reconciler.handle_withdrawal_webhook(&webhook).await.unwrap(),
            WebhookDisposition::Processed
        );

        let resolved = store
            .get_withdrawal_by_reference(&withdrawal.reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.status, WithdrawalStatus::Completed);
        assert_eq!(resolved.transaction_id.as_deref(), Some("prov-tx-7"));
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(50)
        );
    }

    #[tokio::test]
    async fn failed_payout_initiation_refunds_the_debit() {
        let store = Arc::new(MemStore::new());
        let reconciler = reconciler_with(store.clone(), true);
        let user = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.credit_balance(user, dec!(100)).await.unwrap();
        tx.commit().await.unwrap();

        let err = reconciler
            .request_withdrawal(user, dec!(100), "+254700000001")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalFailure(_)));
        assert_eq!(
            store.get_balance(user).await.unwrap().unwrap().amount,
            dec!(100)
        );
    }
}

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

/// Deposit status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "deposit_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Completed,
    Failed,
}

/// Withdrawal status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// In-flight fiat → balance credit, correlated with the provider session
/// through the globally unique `order_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDeposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub order_id: String,
    pub status: DepositStatus,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingDeposit {
    pub fn new(user_id: Uuid, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            order_id: correlation_id("ord"),
            status: DepositStatus::Pending,
            provider_reference: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-flight balance → fiat debit. The balance is debited up front at
/// request time; only a failure webhook may credit it back, exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingWithdrawal {
    pub fn new(user_id: Uuid, amount: Decimal, destination: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            reference: correlation_id("wd"),
            destination,
            status: WithdrawalStatus::Pending,
            transaction_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn correlation_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix)
}

/// Terminal state the provider reports for a payment session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "PENDING")]
    Pending,
}

/// Provider webhook body. Delivery is at-least-once with no ordering
/// guarantee; deposits carry `order_id`, withdrawals carry `reference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhookPayload {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_payload_parses_provider_shape() {
        let payload: PaymentWebhookPayload = serde_json::from_str(
            r#"{"order_id":"ord-1","payment_status":"COMPLETED","transaction_id":"tx-9"}"#,
        )
        .unwrap();
        assert_eq!(payload.order_id.as_deref(), Some("ord-1"));
        assert_eq!(payload.payment_status, PaymentStatus::Completed);
        assert!(payload.reference.is_none());
    }

    #[test]
    fn correlation_ids_are_prefixed_and_distinct() {
        let a = correlation_id("ord");
        let b = correlation_id("ord");
        assert!(a.starts_with("ord-"));
        assert_ne!(a, b);
    }
}

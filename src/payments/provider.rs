use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Outcome of asking the provider to start a payment session
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInitiation {
    pub status: String,
    #[serde(default)]
    pub provider_reference: Option<String>,
}

/// Opaque payment provider. It later reports the terminal result through
/// an at-least-once webhook handled by the reconciler.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Start collecting `amount` of fiat for the deposit `order_id`.
    async fn initiate_payment(
        &self,
        order_id: &str,
        amount: Decimal,
        payer: &str,
    ) -> AppResult<PaymentInitiation>;

    /// Start paying `amount` out to `destination` for the withdrawal
    /// `reference`.
    async fn initiate_payout(
        &self,
        reference: &str,
        amount: Decimal,
        destination: &str,
    ) -> AppResult<PaymentInitiation>;
}

/// HTTP client for the provider's REST API
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> AppResult<PaymentInitiation> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalFailure(format!(
                "payment provider returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn initiate_payment(
        &self,
        order_id: &str,
        amount: Decimal,
        payer: &str,
    ) -> AppResult<PaymentInitiation> {
        self.post(
            "/payments",
            serde_json::json!({
                "order_id": order_id,
                "amount": amount.to_string(),
                "payer": payer,
            }),
        )
        .await
    }

    async fn initiate_payout(
        &self,
        reference: &str,
        amount: Decimal,
        destination: &str,
    ) -> AppResult<PaymentInitiation> {
        self.post(
            "/payouts",
            serde_json::json!({
                "reference": reference,
                "amount": amount.to_string(),
                "destination": destination,
            }),
        )
        .await
    }
}

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;

use super::{LedgerTx, SubmitReceipt, TokenLedger};
use crate::error::{AppError, AppResult};

/// Horizon-style HTTP client for the external asset ledger
pub struct HorizonLedger {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<AccountBalance>,
}

#[derive(Deserialize)]
struct AccountBalance {
    balance: String,
    #[serde(default)]
    asset_code: Option<String>,
}

impl HorizonLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenLedger for HorizonLedger {
    async fn submit(&self, tx: LedgerTx) -> AppResult<SubmitReceipt> {
        let body = match &tx {
            LedgerTx::Payment {
                from,
                to,
                amount,
                asset,
            } => serde_json::json!({
                "type": "payment",
                "from": from,
                "to": to,
                "amount": amount.to_string(),
                "asset_code": asset,
            }),
            LedgerTx::ConfigUpdate { key, value } => serde_json::json!({
                "type": "set_options",
                "key": key,
                "value": value,
            }),
        };

        let response = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let parsed: SubmitResponse = response.json().await?;

        match (status.is_success(), parsed.hash) {
            (true, Some(hash)) => {
                info!(hash = %hash, "ledger transaction accepted");
                Ok(SubmitReceipt { hash })
            }
            _ => Err(AppError::ExternalFailure(
                parsed
                    .error
                    .unwrap_or_else(|| format!("ledger rejected transaction ({})", status)),
            )),
        }
    }

    async fn query_balance(&self, address: &str, asset: &str) -> AppResult<Decimal> {
        let account: AccountResponse = self
            .client
            .get(format!("{}/accounts/{}", self.base_url, address))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::ExternalFailure(format!("account lookup failed: {}", e)))?
            .json()
            .await?;

        let line = account
            .balances
            .iter()
            .find(|b| b.asset_code.as_deref() == Some(asset))
            .ok_or_else(|| {
                AppError::NotFound(format!("trust line for {} on {}", asset, address))
            })?;

        Decimal::from_str(&line.balance)
            .map_err(|e| AppError::ExternalFailure(format!("bad balance from ledger: {}", e)))
    }
}

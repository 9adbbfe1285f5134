pub mod horizon;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AppResult;

pub use horizon::HorizonLedger;

/// Transaction submitted to the external asset ledger
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerTx {
    /// Pay `amount` of `asset` from one account to another
    Payment {
        from: String,
        to: String,
        amount: Decimal,
        asset: String,
    },
    /// Update an issuer account setting
    ConfigUpdate { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub hash: String,
}

/// Opaque external ledger. Submission may also hang past the caller's
/// timeout, in which case the outcome is unknown and must be reconciled
/// out-of-band before any retry.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn submit(&self, tx: LedgerTx) -> AppResult<SubmitReceipt>;

    async fn query_balance(&self, address: &str, asset: &str) -> AppResult<Decimal>;
}

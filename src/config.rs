use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub horizon_url: String,
    pub payment_provider_url: String,
    /// Issuer account on the external ledger (mints pay out of it, burns pay into it)
    pub issuer_address: String,
    /// Asset code of the stablecoin on the external ledger
    pub asset_code: String,
    /// Upper bound on a single ledger submission before the outcome is
    /// treated as unknown
    pub ledger_submit_timeout_secs: u64,
    /// Comma-separated signer identifiers allowed to approve operations
    pub trusted_signers: Vec<String>,
    /// Optional `signer_id=hex_pubkey` pairs enabling ed25519 credential checks
    pub signer_keys: Vec<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/stablecoin".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            horizon_url: std::env::var("HORIZON_URL")
                .unwrap_or_else(|_| "https://horizon.stellar.org".to_string()),
            payment_provider_url: std::env::var("PAYMENT_PROVIDER_URL")
                .unwrap_or_else(|_| "https://api.payments.example.com".to_string()),
            issuer_address: std::env::var("ISSUER_ADDRESS").unwrap_or_default(),
            asset_code: std::env::var("ASSET_CODE").unwrap_or_else(|_| "USDX".to_string()),
            ledger_submit_timeout_secs: std::env::var("LEDGER_SUBMIT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            trusted_signers: std::env::var("TRUSTED_SIGNERS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            signer_keys: std::env::var("SIGNER_KEYS")
                .map(|v| {
                    v.split(',')
                        .filter_map(|pair| {
                            let (id, key) = pair.split_once('=')?;
                            Some((id.trim().to_string(), key.trim().to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

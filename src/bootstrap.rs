use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    accounts::LedgerAccountant,
    api::handler::AppState,
    chain::HorizonLedger,
    config::Config,
    error::AppResult,
    payments::{HttpPaymentProvider, PaymentReconciler},
    store::{PgStore, WalletStore},
    treasury::{
        Ed25519Verifier, ExecutionDispatcher, OperationLedger, QuorumApprovalEngine,
        SignerVerifier, SpawnedExecution, TrustedRoster,
    },
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let store: Arc<dyn WalletStore> = Arc::new(PgStore::connect(&config.database_url).await?);
    info!("✅ Database connected, migrations applied");

    let token_ledger = Arc::new(HorizonLedger::new(config.horizon_url.clone()));
    let provider = Arc::new(HttpPaymentProvider::new(config.payment_provider_url.clone()));
    let accountant = Arc::new(LedgerAccountant::new());

    // Signature-checking roster when keys are configured, identity roster
    // otherwise
    let verifier: Arc<dyn SignerVerifier> = if config.signer_keys.is_empty() {
        if config.trusted_signers.is_empty() {
            warn!("⚠️  TRUSTED_SIGNERS not set - any signer id will be accepted");
        }
        Arc::new(TrustedRoster::new(config.trusted_signers.clone()))
    } else {
        let pairs = config
            .signer_keys
            .iter()
            .map(|(id, key)| (id.as_str(), key.as_str()));
        let verifier = Ed25519Verifier::from_hex_keys(pairs)?;
        info!(
            "✅ Ed25519 signer verification enabled for {} keys",
            config.signer_keys.len()
        );
        Arc::new(verifier)
    };

    let dispatcher = Arc::new(ExecutionDispatcher::new(
        store.clone(),
        token_ledger.clone(),
        accountant.clone(),
        config.issuer_address.clone(),
        config.asset_code.clone(),
        Duration::from_secs(config.ledger_submit_timeout_secs),
    ));

    let operations = Arc::new(OperationLedger::new(store.clone()));
    let approvals = Arc::new(QuorumApprovalEngine::new(
        store.clone(),
        verifier,
        Arc::new(SpawnedExecution::new(dispatcher)),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(
        store.clone(),
        accountant,
        provider,
    ));

    info!("✅ Treasury and payment components initialized");

    Ok(AppState {
        store,
        operations,
        approvals,
        reconciler,
        token_ledger,
        issuer_address: config.issuer_address.clone(),
        asset_code: config.asset_code.clone(),
    })
}

//! Pluggable approval-credential verification.
//!
//! The wallet product historically trusted the bare signer identifier on
//! an approval call. That trust model is kept available as an explicit,
//! visible strategy ([`TrustedRoster`]) rather than reproduced silently,
//! and a verifiable alternative ([`Ed25519Verifier`]) checks a signature
//! over the operation id and payload digest against a configured key set.

use std::collections::{HashMap, HashSet};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::models::Operation;
use crate::error::{AppError, AppResult};

/// Strategy deciding whether an approval vote is admissible
pub trait SignerVerifier: Send + Sync {
    fn verify(
        &self,
        operation: &Operation,
        signer_id: &str,
        credential: Option<&str>,
    ) -> AppResult<()>;
}

/// Bytes a signing credential must cover: operation id followed by the
/// SHA-256 of the canonical payload JSON, binding the vote to this exact
/// action.
pub fn approval_message(operation: &Operation) -> AppResult<Vec<u8>> {
    let payload = serde_json::to_vec(&operation.kind)?;
    let digest = Sha256::digest(&payload);
    let mut message = Vec::with_capacity(16 + digest.len());
    message.extend_from_slice(operation.id.as_bytes());
    message.extend_from_slice(&digest);
    Ok(message)
}

/// Identifier-roster trust model. An empty roster admits any signer,
/// matching the original product behavior; a populated one restricts
/// votes to known identifiers. Neither checks a cryptographic credential.
pub struct TrustedRoster {
    signers: HashSet<String>,
}

impl TrustedRoster {
    pub fn new(signers: impl IntoIterator<Item = String>) -> Self {
        let signers: HashSet<String> = signers.into_iter().collect();
        if signers.is_empty() {
            warn!("signer roster is empty: any caller-supplied signer id will be accepted");
        }
        Self { signers }
    }
}

impl SignerVerifier for TrustedRoster {
    fn verify(
        &self,
        _operation: &Operation,
        signer_id: &str,
        _credential: Option<&str>,
    ) -> AppResult<()> {
        if !self.signers.is_empty() && !self.signers.contains(signer_id) {
            return Err(AppError::InvalidCredential(format!(
                "signer {} is not on the roster",
                signer_id
            )));
        }
        Ok(())
    }
}

/// Checks an ed25519 signature over [`approval_message`] against the
/// public key registered for the signer.
pub struct Ed25519Verifier {
    keys: HashMap<String, VerifyingKey>,
}

impl Ed25519Verifier {
    pub fn from_hex_keys<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> AppResult<Self> {
        let mut keys = HashMap::new();
        for (signer_id, hex_key) in pairs {
            let bytes = hex::decode(hex_key)
                .map_err(|e| AppError::Config(format!("bad signer key hex: {}", e)))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| AppError::Config("signer key must be 32 bytes".to_string()))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| AppError::Config(format!("invalid signer key: {}", e)))?;
            keys.insert(signer_id.to_string(), key);
        }
        Ok(Self { keys })
    }
}

impl SignerVerifier for Ed25519Verifier {
    fn verify(
        &self,
        operation: &Operation,
        signer_id: &str,
        credential: Option<&str>,
    ) -> AppResult<()> {
        let key = self.keys.get(signer_id).ok_or_else(|| {
            AppError::InvalidCredential(format!("no key registered for signer {}", signer_id))
        })?;

        let credential = credential.ok_or_else(|| {
            AppError::InvalidCredential("approval credential is required".to_string())
        })?;

        let bytes = hex::decode(credential)
            .map_err(|_| AppError::InvalidCredential("credential is not valid hex".to_string()))?;
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            AppError::InvalidCredential("credential must be a 64-byte signature".to_string())
        })?;
        let signature = Signature::from_bytes(&bytes);

        let message = approval_message(operation)?;
        key.verify(&message, &signature).map_err(|_| {
            AppError::InvalidCredential(format!(
                "signature does not verify for signer {}",
                signer_id
            ))
        })
    }
}

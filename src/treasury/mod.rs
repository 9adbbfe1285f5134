pub mod approval;
pub mod dispatcher;
pub mod models;
pub mod operations;
pub mod verify;

pub use approval::{ExecutionTrigger, QuorumApprovalEngine, SpawnedExecution};
pub use dispatcher::ExecutionDispatcher;
pub use operations::OperationLedger;
pub use verify::{Ed25519Verifier, SignerVerifier, TrustedRoster};

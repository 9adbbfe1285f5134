pub mod models;
pub mod provider;
pub mod reconciler;

pub use provider::{HttpPaymentProvider, PaymentProvider};
pub use reconciler::{PaymentReconciler, WebhookDisposition};

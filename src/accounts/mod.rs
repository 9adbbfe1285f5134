pub mod accountant;
pub mod models;

pub use accountant::LedgerAccountant;

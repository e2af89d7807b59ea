pub mod db;
pub mod models;
pub mod store;

pub use db::Database;
pub use models::{Account, AccountUpdate, AuditRecord, UpdateOutcome};
pub use store::AccountStore;

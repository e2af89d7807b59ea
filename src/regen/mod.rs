pub mod eligibility;
pub mod engine;
pub mod policy;
pub mod summary;

pub use eligibility::{EligibilityChecker, EligibilityPolicy};
pub use engine::RegenerationService;
pub use policy::{BalancePolicy, GrantPolicy};
pub use summary::{AccountError, CycleOutcome, CycleSummary};

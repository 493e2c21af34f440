mod lease;
mod methods;
mod patch;
mod transitions;
mod types;


pub use patch::{OneOrMany, StatePatch};
pub use types::{
    Cursor, ExecutorInfo, Lease, PlanState, PlanStatus, RecoveryEvent, RecoveryNote, Severity,
    VerificationResult, VerifyTier, CURRENT_SCHEMA_VERSION,
};

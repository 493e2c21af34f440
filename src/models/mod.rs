pub mod manifest;
pub mod state;

pub use manifest::{ExecutionContract, Manifest, ManifestEntry};
pub use state::{PlanState, PlanStatus};

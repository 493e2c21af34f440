pub mod artifacts;
pub mod layout;
pub mod locking;
pub mod manifest_store;
pub mod migrations;
pub mod state_store;

pub use layout::PlansLayout;
pub use locking::{FileLockGuard, FileLockManager, LockSettings, StateMutex};
pub use manifest_store::{read_manifest, write_manifest};
pub use state_store::{load_state, read_state, read_state_required, write_state, LoadedState};

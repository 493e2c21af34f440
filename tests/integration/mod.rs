//! Integration tests driving a plans directory through the public API

mod eligibility;
mod helpers;
mod lifecycle_flow;
mod lock_contention;

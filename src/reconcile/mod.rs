/// Reconciliation of derived artifacts with the bucket
///
/// - `plan.rs` - pure diff of local keys against the remote inventory
/// - `apply.rs` - executes a plan object by object

pub mod apply;
pub mod plan;

pub use apply::{ApplyProgress, ArtifactSource, ReconcileReport, Reconciler};
pub use plan::{build_plan, ReconcileOptions, ReconciliationPlan};

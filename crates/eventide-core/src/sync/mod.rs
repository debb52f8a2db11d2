//! Queue draining, conflict handling and background coordination.

mod backoff;
mod conflict;
mod coordinator;
mod queue;

pub use backoff::RetryPolicy;
pub use conflict::{ConflictResolver, ResolutionOutcome};
pub use coordinator::{SyncCoordinator, TriggerOutcome};
pub use queue::{next_operation, DrainReport, ItemOutcome, MutationQueue};

pub mod eligibility;
pub mod freezer;
pub mod scheduler;
pub mod state;

pub use eligibility::{decide, decide_immediate, Verdict, UNKNOWN_IDLE_FALLBACK_MS};
pub use freezer::{FreezeOutcome, TabFreezer};
pub use scheduler::{SchedulerStatus, SuspensionScheduler, SweepReport, TabVerdict, DEFAULT_SWEEP_INTERVAL};
pub use state::{LoggedSet, Reconciled, SuspendState, SuspendedEntry, SuspendedSet};

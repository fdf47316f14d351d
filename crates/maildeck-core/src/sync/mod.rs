pub mod engine;
pub mod enrichment;
pub mod scheduler;
pub mod snooze;

pub use engine::{SyncEngine, SyncOutcome};
pub use enrichment::EnrichmentWorker;
pub use scheduler::run_sync_engine;
pub use snooze::run_snooze_scheduler;

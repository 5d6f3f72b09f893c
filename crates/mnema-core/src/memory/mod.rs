pub mod conflicts;
pub mod engine;
pub mod locks;
pub mod record;
pub mod store;

pub use engine::{EngineTuning, MemoryEngine, PruneReport, RecallResult, RememberOutcome};
pub use locks::UserLocks;
pub use record::{exact_hash, MemoryProjection, MemoryRecord, Tag};
pub use store::MemoryStore;

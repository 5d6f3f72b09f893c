pub mod store;

pub use store::{Checkpoint, CheckpointStore, SavedCheckpoint};

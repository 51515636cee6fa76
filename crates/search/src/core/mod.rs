//! Traits the engine consumes from its storage collaborator.

mod search;

pub use search::SearchStorage;

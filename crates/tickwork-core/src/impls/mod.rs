//! Implementations of the ports.
//!
//! - `memory`: process-lifetime stores for tests and embedding
//! - `file`: durable stores under a state directory

pub mod file;
pub mod memory;
mod table;

pub use self::file::{FileCheckpointStore, FileEffectJournal, FileStores, FileTaskStore};
pub use self::memory::{InMemoryCheckpointStore, InMemoryEffectJournal, InMemoryTaskStore};

//! File-backed stores.
//!
//! Layout under a state directory:
//! - `tasks.json`: task table snapshot (records + counters)
//! - `checkpoints/<task-id>.ckpt`: version tag + checkpoint bytes
//! - `effects.jsonl`: effect journal

mod atomic;
mod checkpoints;
mod journal;
mod tasks;

use std::path::Path;
use std::sync::Arc;

pub use self::checkpoints::FileCheckpointStore;
pub use self::journal::FileEffectJournal;
pub use self::tasks::FileTaskStore;

use crate::domain::StoreError;

/// The three file stores of one state directory.
pub struct FileStores {
    pub tasks: Arc<FileTaskStore>,
    pub checkpoints: Arc<FileCheckpointStore>,
    pub journal: Arc<FileEffectJournal>,
}

impl FileStores {
    pub async fn open(state_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            tasks: Arc::new(FileTaskStore::open(state_dir.join("tasks.json")).await?),
            checkpoints: Arc::new(FileCheckpointStore::open(state_dir.join("checkpoints")).await?),
            journal: Arc::new(FileEffectJournal::open(state_dir.join("effects.jsonl")).await?),
        })
    }
}

//! Append-only JSON-lines effect journal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use super::atomic::{Detached, append_synced, read_optional, write_atomic};
use crate::domain::{EffectKey, JournalEntry, StoreError, TaskId};
use crate::ports::EffectJournal;

#[derive(Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    keys: HashSet<EffectKey>,
    write: Detached,
    /// The last write failed or was never seen to finish; reload from the file.
    stale: bool,
}

impl JournalState {
    fn push(&mut self, entry: JournalEntry) {
        self.keys.insert(entry.key);
        self.entries.push(entry);
    }
}

/// Each commit is one line, appended and synced before `commit` returns.
///
/// A crash mid-append can leave a torn last line; loading drops it and
/// rewrites the file so later appends start on a clean line. A commit whose
/// future is dropped mid-append may still land, so the next call re-reads
/// the file instead of trusting the in-memory key set.
pub struct FileEffectJournal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl FileEffectJournal {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let (state, repair) = load(&path).await?;
        if let Some(data) = repair {
            write_atomic(&path, &data).await?;
        }
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the state, re-reading the file first if a write was interrupted.
    async fn fresh(&self) -> Result<MutexGuard<'_, JournalState>, StoreError> {
        let mut state = self.state.lock().await;
        if let Err(err) = state.write.settle().await {
            tracing::warn!(path = %self.path.display(), error = %err, "interrupted journal write failed");
        }
        if state.stale {
            tracing::debug!(path = %self.path.display(), "reloading journal after interrupted write");
            let (loaded, repair) = load(&self.path).await?;
            if let Some(data) = repair {
                let path = self.path.clone();
                state.write.start(async move { write_atomic(&path, &data).await });
                state.write.settle().await?;
            }
            *state = loaded;
        }
        Ok(state)
    }
}

/// Read the journal. A torn last line is dropped; the returned bytes are the
/// clean file to write back in that case.
async fn load(path: &Path) -> Result<(JournalState, Option<Vec<u8>>), StoreError> {
    let mut state = JournalState::default();
    let Some(bytes) = read_optional(path).await? else {
        return Ok((state, None));
    };
    if !parse_lines(&bytes, &mut state, path)? {
        return Ok((state, None));
    }
    tracing::warn!(path = %path.display(), "repairing torn journal tail");
    let clean = encode_all(&state.entries)?;
    Ok((state, Some(clean)))
}

/// Returns `true` if the file does not end on a clean line boundary.
fn parse_lines(bytes: &[u8], state: &mut JournalState, path: &Path) -> Result<bool, StoreError> {
    let mut lines = bytes.split(|b| *b == b'\n').peekable();
    let mut line_no = 0usize;
    while let Some(line) = lines.next() {
        line_no += 1;
        let is_last = lines.peek().is_none();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<JournalEntry>(line) {
            Ok(entry) => state.push(entry),
            // Only the final line may be torn; it was never newline-terminated.
            Err(_) if is_last => return Ok(true),
            Err(e) => {
                return Err(StoreError::Corrupt(format!(
                    "journal {} line {line_no}: {e}",
                    path.display()
                )));
            }
        }
    }
    Ok(!bytes.is_empty() && !bytes.ends_with(b"\n"))
}

fn encode_line(entry: &JournalEntry) -> Result<Vec<u8>, StoreError> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    Ok(line)
}

fn encode_all(entries: &[JournalEntry]) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend(encode_line(entry)?);
    }
    Ok(out)
}

#[async_trait]
impl EffectJournal for FileEffectJournal {
    async fn commit(&self, entry: JournalEntry) -> Result<bool, StoreError> {
        let mut state = self.fresh().await?;
        if state.keys.contains(&entry.key) {
            return Ok(false);
        }
        let (path, line) = (self.path.clone(), encode_line(&entry)?);
        state.stale = true;
        state.write.start(async move { append_synced(&path, &line).await });
        state.write.settle().await?;
        state.push(entry);
        state.stale = false;
        Ok(true)
    }

    async fn contains(&self, key: &EffectKey) -> Result<bool, StoreError> {
        Ok(self.fresh().await?.keys.contains(key))
    }

    async fn entries(&self, task_id: Option<TaskId>) -> Result<Vec<JournalEntry>, StoreError> {
        let state = self.fresh().await?;
        Ok(state
            .entries
            .iter()
            .filter(|e| task_id.is_none_or(|id| e.key.task_id == id))
            .cloned()
            .collect())
    }

    async fn forget(&self, task_id: TaskId) -> Result<usize, StoreError> {
        let mut state = self.fresh().await?;
        let kept: Vec<JournalEntry> = state
            .entries
            .iter()
            .filter(|e| e.key.task_id != task_id)
            .cloned()
            .collect();
        let removed = state.entries.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }
        let (path, data) = (self.path.clone(), encode_all(&kept)?);
        state.stale = true;
        state.write.start(async move { write_atomic(&path, &data).await });
        state.write.settle().await?;
        state.keys.retain(|k| k.task_id != task_id);
        state.entries = kept;
        state.stale = false;
        Ok(removed)
    }
}

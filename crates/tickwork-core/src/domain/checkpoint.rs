//! Checkpoints: the only state a resumed task may rely on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic step cursor. Cursor `n` means steps `0..n` are durably done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepCursor(pub u64);

impl StepCursor {
    pub const START: StepCursor = StepCursor(0);

    pub fn next(self) -> Self {
        StepCursor(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StepCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Decoded progress of a task: where it is and what it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cursor: StepCursor,
    pub state: serde_json::Value,
}

impl Checkpoint {
    /// Checkpoint a task starts from before anything was saved.
    pub fn initial(state: serde_json::Value) -> Self {
        Self {
            cursor: StepCursor::START,
            state,
        }
    }

    /// Checkpoint after one more step produced `state`.
    pub fn advance(&self, state: serde_json::Value) -> Self {
        Self {
            cursor: self.cursor.next(),
            state,
        }
    }
}

/// What a checkpoint store persists: a format version plus opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCheckpoint {
    pub version: u16,
    pub bytes: Vec<u8>,
}

impl EncodedCheckpoint {
    pub fn new(version: u16, bytes: Vec<u8>) -> Self {
        Self { version, bytes }
    }

    /// Framing used by byte-oriented stores: big-endian version, then body.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(2 + self.bytes.len());
        frame.extend_from_slice(&self.version.to_be_bytes());
        frame.extend_from_slice(&self.bytes);
        frame
    }

    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let (head, body) = frame.split_first_chunk::<2>()?;
        Some(Self {
            version: u16::from_be_bytes(*head),
            bytes: body.to_vec(),
        })
    }
}

//! CheckpointCodec - `Checkpoint` <-> versioned bytes.

use crate::domain::{Checkpoint, EncodedCheckpoint, StoreError};

/// Version written by `encode`. Decoding accepts this and every older version.
pub const CHECKPOINT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointCodec;

impl CheckpointCodec {
    pub fn encode(&self, checkpoint: &Checkpoint) -> Result<EncodedCheckpoint, StoreError> {
        Ok(EncodedCheckpoint::new(
            CHECKPOINT_VERSION,
            serde_json::to_vec(checkpoint)?,
        ))
    }

    pub fn decode(&self, encoded: &EncodedCheckpoint) -> Result<Checkpoint, StoreError> {
        match encoded.version {
            1 => Ok(serde_json::from_slice(&encoded.bytes)?),
            found if found > CHECKPOINT_VERSION => Err(StoreError::UnsupportedVersion {
                found,
                supported: CHECKPOINT_VERSION,
            }),
            found => Err(StoreError::Corrupt(format!(
                "unknown checkpoint version {found}"
            ))),
        }
    }
}

//! Durable file writes.

use std::ffi::OsString;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::domain::StoreError;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `data` so that a reader sees either the old or the
/// new content, and the new content survives a crash once this returns.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    sync_parent(path).await
}

/// Append `data` and flush it to disk.
pub(crate) async fn append_synced(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

/// Remove `path` durably. A missing file is fine.
pub(crate) async fn remove_synced(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => sync_parent(path).await,
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Read `path`, mapping "does not exist" to `None`.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// A store write that runs to completion even if the caller's future is
/// dropped, so the next caller can wait for it before reading the file.
#[derive(Debug, Default)]
pub(crate) struct Detached {
    handle: Option<JoinHandle<Result<(), StoreError>>>,
}

impl Detached {
    pub(crate) fn start<F>(&mut self, write: F)
    where
        F: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        self.handle = Some(tokio::spawn(write));
    }

    /// Wait for the last started write. `Ok` when nothing is in flight.
    pub(crate) async fn settle(&mut self) -> Result<(), StoreError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.handle = None;
        joined.map_err(std::io::Error::other)?
    }
}

#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<(), StoreError> {
    // Persists the directory entry created or removed by rename/unlink.
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::File::open(dir).await?.sync_all().await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

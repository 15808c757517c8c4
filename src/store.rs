//! Persistent Store: the durable `(current_term, voted_for, log,
//! commit_index, last_applied)` blob for a single node, rewritten
//! atomically on every mutation (write-temp + rename + fsync on parent).

use crate::RaftPersistentState;
use log::error;
use std::io;
use std::path::{Path, PathBuf};

/// Returns the state-file path for a given node id, rooted at `base_dir`.
pub fn state_file_path(base_dir: &Path, node_id: &str) -> PathBuf {
    base_dir.join(format!("raft_state_{}.bin", node_id))
}

/// Persist `state` to `path`, replacing whatever was there before.
///
/// The write lands in a sibling temp file first, is fsync'd, then renamed
/// into place -- a reader never observes a partially written file, and a
/// crash between the write and the rename leaves the previous file intact.
pub async fn persist(path: &Path, state: &RaftPersistentState) -> anyhow::Result<()> {
    let bytes = bincode::serialize(state)?;
    let tmp_path = tmp_path_for(path);

    tokio::fs::write(&tmp_path, &bytes).await?;

    let tmp_file = tokio::fs::File::open(&tmp_path).await?;
    tmp_file.sync_all().await?;
    drop(tmp_file);

    tokio::fs::rename(&tmp_path, path).await?;

    if let Some(dir) = path.parent() {
        sync_dir(dir).await?;
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    match path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

async fn sync_dir(dir: &Path) -> anyhow::Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let f = std::fs::File::open(&dir)?;
        f.sync_all()
    })
    .await??;
    Ok(())
}

/// Load a previously persisted state blob, if present.
pub fn load(path: &Path) -> Option<RaftPersistentState> {
    match std::fs::read(path) {
        Ok(bytes) => match bincode::deserialize::<RaftPersistentState>(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                error!("failed to deserialize persisted state from {}: {}", path.display(), e);
                None
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            error!("failed to read persisted state from {}: {}", path.display(), e);
            None
        }
    }
}

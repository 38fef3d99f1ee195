//! Staging: materialize selected remote files into the local mirror.
//!
//! Each remote folder maps to a local directory of the same (root-relative)
//! name under the staging root. Directory creation is idempotent; downloads
//! overwrite whatever a previous partial run left behind, so re-staging a
//! file is always safe.
//!
//! Download failures are isolated per file: the failed file is recorded in
//! the outcome (the orchestrator feeds it into the retry list) and staging
//! continues. Only filesystem errors on the folder itself abort the batch.

use crate::remote::{RemoteFile, RemoteRoot, RemoteStore};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What staging one folder produced.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Local paths of freshly written files. Empty means the folder batch
    /// has nothing new and the derivative/publish stages are skipped.
    pub staged: Vec<PathBuf>,
    /// Files whose download failed; candidates for the retry list.
    pub failed: Vec<RemoteFile>,
}

impl StageOutcome {
    /// The at-least-once reprocessing boundary: derivatives and publishing
    /// run only when this is true.
    pub fn any_new_files(&self) -> bool {
        !self.staged.is_empty()
    }
}

/// Directory under the staging root for files that live directly at the
/// traversal root. The staging root itself must never become a batch: it
/// holds the run-state sidecars and every other batch directory, none of
/// which belong on the publish target.
pub const ROOT_BATCH_DIR: &str = "_root";

/// Local directory for a folder listing: the remote's root-relative path
/// mirrored under the staging root. The traversal root maps to
/// [`ROOT_BATCH_DIR`], not to the staging root itself.
pub fn local_dir_for(staging_root: &Path, remote_path: &str) -> PathBuf {
    let relative = remote_path.trim_start_matches('/');
    if relative.is_empty() {
        staging_root.join(ROOT_BATCH_DIR)
    } else {
        staging_root.join(relative)
    }
}

/// Download `files` from one remote folder into its local mirror directory.
pub fn stage_folder(
    store: &impl RemoteStore,
    root: &RemoteRoot,
    files: &[&RemoteFile],
    local_dir: &Path,
) -> Result<StageOutcome, StageError> {
    let mut outcome = StageOutcome::default();
    if files.is_empty() {
        return Ok(outcome);
    }
    std::fs::create_dir_all(local_dir)?;

    for file in files {
        let local_path = local_dir.join(&file.name);
        match store.download(root, &file.path) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&local_path, &bytes) {
                    warn!(path = %local_path.display(), error = %err, "write failed");
                    outcome.failed.push((*file).clone());
                } else {
                    info!(remote = %file.path, local = %local_path.display(), "staged");
                    outcome.staged.push(local_path);
                }
            }
            Err(err) => {
                warn!(path = %file.path, error = %err, "download failed");
                outcome.failed.push((*file).clone());
            }
        }
    }

    Ok(outcome)
}

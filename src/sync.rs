//! Run orchestration: walk, filter, stage, process, publish, checkpoint.
//!
//! One run is a single pass over the remote tree. Per folder:
//!
//! 1. The change filter selects files that are strictly newer than the
//!    watermark (plus anything on the retry list from earlier failed
//!    downloads).
//! 2. Selected files are staged into the local mirror.
//! 3. If the folder gained at least one new file, the whole folder batch is
//!    run through the derivative pipeline and published. No new files, no
//!    work — the at-least-once boundary.
//!
//! The watermark is advanced to the *start* instant of the run, and only
//! when the run completes with no fatal error, no failed image, and no
//! failed upload. Anything less leaves the old watermark in place so the
//! next run re-evaluates the same window; every downstream step tolerates
//! reprocessing. Failed downloads alone do not hold the watermark back —
//! they are queued on the retry list and re-attempted next run regardless
//! of the watermark.

use crate::config::JobConfig;
use crate::filter::{self, Verdict, evaluate_file};
use crate::matting::Matting;
use crate::pipeline::{self, PipelineError, RunContext};
use crate::publish::{PublishTarget, Publisher, TransferError};
use crate::remote::{RemoteError, RemoteFile, RemoteStore};
use crate::stage::{ROOT_BATCH_DIR, StageError, local_dir_for, stage_folder};
use crate::walker::{FolderListing, Walker};
use crate::watermark::{RetryEntry, RetryList, WatermarkError, stores_in};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Totals for one run. Printed at the end of every CLI invocation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub folders_visited: usize,
    /// Folders that gained new files and went through the full pipeline.
    pub folders_processed: usize,
    pub files_staged: usize,
    /// Failed downloads, queued on the retry list.
    pub downloads_failed: usize,
    pub images_processed: usize,
    pub images_failed: usize,
    pub files_uploaded: usize,
    pub files_skipped: usize,
    pub uploads_failed: usize,
    pub watermark_advanced: bool,
}

impl RunReport {
    /// Whether anything went wrong that the operator should look at.
    pub fn clean(&self) -> bool {
        self.downloads_failed == 0 && self.images_failed == 0 && self.uploads_failed == 0
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "folders: {} visited, {} processed",
            self.folders_visited, self.folders_processed
        )?;
        writeln!(
            f,
            "staged:  {} files ({} downloads failed, queued for retry)",
            self.files_staged, self.downloads_failed
        )?;
        writeln!(
            f,
            "images:  {} processed, {} failed",
            self.images_processed, self.images_failed
        )?;
        writeln!(
            f,
            "publish: {} uploaded, {} skipped, {} failed",
            self.files_uploaded, self.files_skipped, self.uploads_failed
        )?;
        write!(
            f,
            "watermark {}",
            if self.watermark_advanced {
                "advanced"
            } else {
                "held back"
            }
        )
    }
}

/// Full run: mirror, derive, publish, checkpoint.
pub fn run_sync(
    store: &impl RemoteStore,
    matting: &impl Matting,
    target: &mut impl PublishTarget,
    config: &JobConfig,
    staging_root: &Path,
    now: DateTime<Utc>,
) -> Result<RunReport, SyncError> {
    std::fs::create_dir_all(staging_root)?;
    let (watermark_store, retry_list) = stores_in(staging_root);
    let watermark = watermark_store.load()?;
    info!(?watermark, "run started");

    let derivative_config = config
        .derivatives
        .derivative_config(&config.filter.extensions);
    let publisher = Publisher::new(
        config.publish.base_path.clone(),
        config.publish.policy.conflict_policy(),
    );
    let mut ctx = RunContext::new();
    let mut report = RunReport::default();

    mirror_changes(
        store,
        config,
        staging_root,
        watermark,
        now,
        &retry_list,
        &mut report,
        |listing, local_dir, report| {
            let batch = pipeline::process_folder(matting, local_dir, &derivative_config, &mut ctx)?;
            report.images_processed += batch.processed;
            report.images_failed += batch.failed;

            // Files at the traversal root are batched under their own
            // directory on both sides; the staging root itself (run-state
            // sidecars, sibling batches) is never a publish source.
            let remote_dir = if listing.path.is_empty() {
                ROOT_BATCH_DIR
            } else {
                listing.path.trim_start_matches('/')
            };
            let published = publisher.publish_folder(target, local_dir, remote_dir)?;
            report.files_uploaded += published.uploaded;
            report.files_skipped += published.skipped;
            report.uploads_failed += published.failed;
            Ok(())
        },
    )?;

    // The checkpoint records the run *start*: files modified mid-run land
    // after it and are picked up next time. Failed downloads are already
    // covered by the retry list; failed images or uploads are not, so they
    // hold the watermark back.
    report.watermark_advanced = report.images_failed == 0 && report.uploads_failed == 0;
    if report.watermark_advanced {
        watermark_store.save(now)?;
    } else {
        warn!(
            images_failed = report.images_failed,
            uploads_failed = report.uploads_failed,
            "failures during run, watermark not advanced"
        );
    }
    Ok(report)
}

/// Mirror-only run: stage new files, touch nothing else.
///
/// The watermark is *not* advanced — a later full sync still sees these
/// files as new — but the retry list is maintained so failed downloads are
/// not lost.
pub fn run_pull(
    store: &impl RemoteStore,
    config: &JobConfig,
    staging_root: &Path,
    now: DateTime<Utc>,
) -> Result<RunReport, SyncError> {
    std::fs::create_dir_all(staging_root)?;
    let (watermark_store, retry_list) = stores_in(staging_root);
    let watermark = watermark_store.load()?;

    let mut report = RunReport::default();
    mirror_changes(
        store,
        config,
        staging_root,
        watermark,
        now,
        &retry_list,
        &mut report,
        |_, _, _| Ok(()),
    )?;
    Ok(report)
}

/// The shared walk-filter-stage loop.
///
/// `on_staged` runs once per folder that gained new files. Retry-list
/// bookkeeping happens here: entries are dropped once their file stages
/// successfully and added for every failed download; the updated list is
/// persisted even when the walk ends in an error.
#[allow(clippy::too_many_arguments)]
fn mirror_changes(
    store: &impl RemoteStore,
    config: &JobConfig,
    staging_root: &Path,
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    retry_list: &RetryList,
    report: &mut RunReport,
    mut on_staged: impl FnMut(&FolderListing, &Path, &mut RunReport) -> Result<(), SyncError>,
) -> Result<(), SyncError> {
    let rules = config.filter.file_rules();
    let root = config.remote.root();
    let mut pending: BTreeMap<String, RetryEntry> = retry_list
        .load()
        .into_iter()
        .map(|entry| (entry.path.clone(), entry))
        .collect();
    if !pending.is_empty() {
        info!(entries = pending.len(), "retry list loaded");
    }

    let walker = Walker::new(store, &root, config.remote.on_error.failure_mode())
        .with_gate(config.filter.folder_gate());

    let mut outcome = Ok(());
    for item in walker {
        let listing = match item {
            Ok(listing) => listing,
            Err(err) => {
                outcome = Err(err.into());
                break;
            }
        };
        report.folders_visited += 1;

        // A retry entry whose file has vanished from its folder's listing is
        // unrecoverable; drop it so the sidecar does not accumulate dead
        // paths. Isolated subtrees are never listed, so their entries stay
        // until the subtree is reachable again.
        let listed: HashSet<&str> = listing.files.iter().map(|f| f.path.as_str()).collect();
        pending.retain(|path, _| {
            let parent = path.rsplit_once('/').map_or("", |(dir, _)| dir);
            if parent != listing.path || listed.contains(path.as_str()) {
                return true;
            }
            info!(path = %path, "retry entry no longer on the remote, dropped");
            false
        });

        let selected: Vec<&RemoteFile> = listing
            .files
            .iter()
            .filter(|file| {
                // Retry entries bypass the watermark: their instants are
                // already behind it by the time we get here.
                if pending.contains_key(&file.path) {
                    debug!(path = %file.path, "selected via retry list");
                    return true;
                }
                match evaluate_file(file, watermark, &rules) {
                    Verdict::Include => true,
                    Verdict::Exclude(reason) => {
                        debug!(path = %file.path, %reason, "excluded");
                        false
                    }
                }
            })
            .collect();
        if selected.is_empty() {
            continue;
        }

        if config.filter.min_files_per_folder > 0
            && !filter::folder_meets_threshold(&selected, config.filter.min_files_per_folder, now)
        {
            info!(
                folder = %listing.path,
                files = selected.len(),
                "below folder threshold, deferred to a later run"
            );
            continue;
        }

        let local_dir = local_dir_for(staging_root, &listing.path);
        let staged = match stage_folder(store, &root, &selected, &local_dir) {
            Ok(staged) => staged,
            Err(err) => {
                outcome = Err(err.into());
                break;
            }
        };
        for failed in &staged.failed {
            pending.insert(
                failed.path.clone(),
                RetryEntry {
                    path: failed.path.clone(),
                    modified: failed.modified,
                },
            );
        }
        for file in &selected {
            if !staged.failed.iter().any(|f| f.path == file.path) {
                pending.remove(&file.path);
            }
        }
        report.files_staged += staged.staged.len();
        report.downloads_failed += staged.failed.len();

        if !staged.any_new_files() {
            continue;
        }
        report.folders_processed += 1;
        if let Err(err) = on_staged(&listing, &local_dir, report) {
            outcome = Err(err);
            break;
        }
    }

    let entries: Vec<RetryEntry> = pending.into_values().collect();
    retry_list.save(&entries)?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_display_mentions_watermark_state() {
        let mut report = RunReport::default();
        assert!(report.to_string().contains("watermark held back"));
        report.watermark_advanced = true;
        assert!(report.to_string().contains("watermark advanced"));
    }

    #[test]
    fn clean_requires_no_failures_of_any_kind() {
        let mut report = RunReport {
            files_staged: 3,
            images_processed: 3,
            ..RunReport::default()
        };
        assert!(report.clean());
        report.downloads_failed = 1;
        assert!(!report.clean());
    }
}

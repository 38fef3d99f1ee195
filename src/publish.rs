//! Republish processed batches to the FTP web host.
//!
//! The [`PublishTarget`] trait is the seam between publish policy and the
//! wire: production uses [`FtpTarget`] over suppaftp, tests use an
//! in-memory double. Everything above the trait speaks in typed outcomes —
//! [`MkdirOutcome`] instead of sniffing "already exists" out of error
//! strings, [`TransferError::NotFound`] instead of matching on status 550
//! at every call site.
//!
//! Conflict handling is a [`ConflictPolicy`]: the default skips files the
//! host already has (uploads are the slow part, and derivative output for
//! an unchanged source is identical), `Replace` deletes and re-uploads.
//! Either way a re-run converges on the same remote state, so a publish
//! interrupted halfway is repaired by running again.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TransferError {
    /// The remote path does not exist (FTP 550).
    #[error("remote path not found")]
    NotFound,
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a directory-creation request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkdirOutcome {
    Created,
    AlreadyExists,
}

/// Minimal remote filesystem surface the publisher needs.
pub trait PublishTarget {
    fn make_directory(&mut self, path: &str) -> Result<MkdirOutcome, TransferError>;
    fn exists(&mut self, path: &str) -> Result<bool, TransferError>;
    fn delete(&mut self, path: &str) -> Result<(), TransferError>;
    fn upload(&mut self, path: &str, bytes: &[u8]) -> Result<(), TransferError>;
}

/// [`PublishTarget`] over a blocking FTP session.
pub struct FtpTarget {
    stream: FtpStream,
}

impl FtpTarget {
    /// Connect and log in. `host` may carry an explicit port; 21 otherwise.
    pub fn connect(host: &str, user: &str, password: &str) -> Result<Self, TransferError> {
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:21")
        };
        let mut stream = FtpStream::connect(&addr).map_err(map_ftp_error)?;
        stream.login(user, password).map_err(map_ftp_error)?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(map_ftp_error)?;
        info!(host = %addr, "FTP session established");
        Ok(Self { stream })
    }

    pub fn quit(mut self) {
        if let Err(err) = self.stream.quit() {
            debug!(error = %err, "FTP quit failed");
        }
    }
}

fn map_ftp_error(err: FtpError) -> TransferError {
    match err {
        FtpError::UnexpectedResponse(response) => match response.status {
            Status::FileUnavailable => TransferError::NotFound,
            Status::NotLoggedIn => {
                TransferError::Denied(String::from_utf8_lossy(&response.body).into_owned())
            }
            status => TransferError::Protocol(format!(
                "{status:?}: {}",
                String::from_utf8_lossy(&response.body)
            )),
        },
        FtpError::ConnectionError(io) => TransferError::Io(io),
        other => TransferError::Protocol(other.to_string()),
    }
}

impl PublishTarget for FtpTarget {
    fn make_directory(&mut self, path: &str) -> Result<MkdirOutcome, TransferError> {
        match self.stream.mkdir(path) {
            Ok(()) => Ok(MkdirOutcome::Created),
            // Servers report an existing directory as 550.
            Err(err) => match map_ftp_error(err) {
                TransferError::NotFound => Ok(MkdirOutcome::AlreadyExists),
                other => Err(other),
            },
        }
    }

    fn exists(&mut self, path: &str) -> Result<bool, TransferError> {
        match self.stream.size(path) {
            Ok(_) => Ok(true),
            Err(err) => match map_ftp_error(err) {
                TransferError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }

    fn delete(&mut self, path: &str) -> Result<(), TransferError> {
        self.stream.rm(path).map_err(map_ftp_error)
    }

    fn upload(&mut self, path: &str, bytes: &[u8]) -> Result<(), TransferError> {
        self.stream
            .put_file(path, &mut Cursor::new(bytes))
            .map_err(map_ftp_error)?;
        Ok(())
    }
}

/// How to handle a file the remote already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave the remote copy in place. The default: derivative output for
    /// an unchanged source is byte-for-byte reproducible, so there is
    /// nothing to gain from re-uploading.
    #[default]
    SkipIfPresent,
    /// Delete the remote copy, then upload.
    Replace,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Mirrors one processed batch (its root files plus every sub-directory)
/// under `base_path` on the target.
pub struct Publisher {
    base_path: String,
    policy: ConflictPolicy,
}

impl Publisher {
    pub fn new(base_path: impl Into<String>, policy: ConflictPolicy) -> Self {
        Self {
            base_path: base_path.into().trim_matches('/').to_string(),
            policy,
        }
    }

    /// Publish `local` as `remote_dir` under the base path.
    ///
    /// Directory creation failures abort the folder (nothing below would
    /// succeed); individual file transfers are isolated, logged, and
    /// counted in the report.
    pub fn publish_folder(
        &self,
        target: &mut impl PublishTarget,
        local: &Path,
        remote_dir: &str,
    ) -> Result<PublishReport, TransferError> {
        let mut report = PublishReport::default();
        let root = join_remote(&self.base_path, remote_dir);
        self.ensure_directory(target, &root)?;

        // BTreeMap keyed by remote sub-path keeps transfer order stable:
        // root files first, then each sub-directory alphabetically.
        let mut plan: BTreeMap<String, Vec<std::path::PathBuf>> = BTreeMap::new();
        collect_files(local, "", &mut plan)?;

        for (sub, files) in &plan {
            let remote_parent = join_remote(&root, sub);
            if !sub.is_empty() {
                self.ensure_directory(target, &remote_parent)?;
            }
            for file in files {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let remote_path = join_remote(&remote_parent, &name);
                match self.publish_file(target, file, &remote_path) {
                    Ok(Published::Uploaded) => report.uploaded += 1,
                    Ok(Published::Skipped) => report.skipped += 1,
                    Err(err) => {
                        warn!(path = %remote_path, error = %err, "transfer failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            folder = remote_dir,
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            "folder published"
        );
        Ok(report)
    }

    /// Create `path` and any missing ancestors, one component at a time.
    /// An ancestor that already exists is the common case, not an error.
    fn ensure_directory(
        &self,
        target: &mut impl PublishTarget,
        path: &str,
    ) -> Result<(), TransferError> {
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = join_remote(&current, component);
            if target.make_directory(&current)? == MkdirOutcome::Created {
                debug!(path = %current, "remote directory created");
            }
        }
        Ok(())
    }

    fn publish_file(
        &self,
        target: &mut impl PublishTarget,
        local: &Path,
        remote_path: &str,
    ) -> Result<Published, TransferError> {
        if target.exists(remote_path)? {
            match self.policy {
                ConflictPolicy::SkipIfPresent => {
                    debug!(path = %remote_path, "already present, skipped");
                    return Ok(Published::Skipped);
                }
                ConflictPolicy::Replace => target.delete(remote_path)?,
            }
        }
        let bytes = std::fs::read(local)?;
        target.upload(remote_path, &bytes)?;
        debug!(path = %remote_path, bytes = bytes.len(), "uploaded");
        Ok(Published::Uploaded)
    }
}

enum Published {
    Uploaded,
    Skipped,
}

fn join_remote(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Files directly in `dir` plus one level of sub-directories, keyed by the
/// remote-relative sub-path. Batches are flat trees by construction, so one
/// level is the whole shape.
fn collect_files(
    dir: &Path,
    prefix: &str,
    plan: &mut BTreeMap<String, Vec<std::path::PathBuf>>,
) -> Result<(), TransferError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            if prefix.is_empty() {
                let name = entry.file_name().to_string_lossy().into_owned();
                collect_files(&path, &name, plan)?;
            }
        } else {
            files.push(path);
        }
    }
    files.sort();
    plan.insert(prefix.to_string(), files);
    Ok(())
}

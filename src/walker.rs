//! Depth-first traversal of the remote namespace.
//!
//! The walker drives [`RemoteStore`] listings with an explicit work stack
//! instead of language recursion, so arbitrarily deep trees cannot overflow
//! the stack and a failing subtree can be skipped without unwinding through
//! recursive frames.
//!
//! Each visited folder is drained completely — the pagination loop exchanges
//! cursors until `has_more` clears — before its listing is yielded as one
//! [`FolderListing`]. Sub-folders are then pushed so the *first* child is
//! visited next (depth-first, siblings in page order).
//!
//! ## Failure isolation
//!
//! A listing error has two configurable outcomes:
//!
//! - [`FailureMode::IsolateSubtree`] (default): log the error, treat the
//!   subtree as empty, continue with the remaining stack.
//! - [`FailureMode::Abort`]: yield the error and end the walk. The caller
//!   treats this as fatal and the watermark is not advanced.

use crate::filter::{self, FolderGate};
use crate::remote::{RemoteEntry, RemoteError, RemoteFile, RemoteFolder, RemoteRoot, RemoteStore};
use tracing::{debug, warn};

/// What to do when listing a folder fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    IsolateSubtree,
    Abort,
}

/// One fully-listed remote folder: all file entries across all pages, plus
/// the sub-folders that will be visited next.
#[derive(Debug, Clone)]
pub struct FolderListing {
    /// Folder name (`""` for the traversal root).
    pub name: String,
    /// Root-relative path (`""` for the traversal root).
    pub path: String,
    pub files: Vec<RemoteFile>,
    pub subfolders: Vec<RemoteFolder>,
}

/// Lazy depth-first iterator over the remote tree.
pub struct Walker<'a, S: RemoteStore> {
    store: &'a S,
    root: &'a RemoteRoot,
    failure_mode: FailureMode,
    gate: Option<FolderGate>,
    /// Pending folders, top of the stack visited next.
    stack: Vec<RemoteFolder>,
    aborted: bool,
}

impl<'a, S: RemoteStore> Walker<'a, S> {
    pub fn new(store: &'a S, root: &'a RemoteRoot, failure_mode: FailureMode) -> Self {
        Self {
            store,
            root,
            failure_mode,
            gate: None,
            stack: vec![RemoteFolder {
                name: String::new(),
                path: String::new(),
            }],
            aborted: false,
        }
    }

    /// Install a folder-name gate. Gated-out folders are neither listed nor
    /// descended into. The traversal root is never gated.
    pub fn with_gate(mut self, gate: Option<FolderGate>) -> Self {
        self.gate = gate;
        self
    }

    /// List one folder completely, concatenating all pages.
    fn list_all_pages(&self, folder: &RemoteFolder) -> Result<FolderListing, RemoteError> {
        let mut files = Vec::new();
        let mut subfolders = Vec::new();

        let mut page = self.store.list_folder(self.root, &folder.path)?;
        loop {
            debug!(
                path = %folder.path,
                entries = page.entries.len(),
                has_more = page.has_more,
                "listed page"
            );
            for entry in page.entries {
                match entry {
                    RemoteEntry::File(mut file) => {
                        file.path = format!("{}/{}", folder.path, file.name);
                        files.push(file);
                    }
                    RemoteEntry::Folder(mut sub) => {
                        sub.path = format!("{}/{}", folder.path, sub.name);
                        subfolders.push(sub);
                    }
                }
            }
            if !page.has_more {
                break;
            }
            page = self.store.list_continue(&page.cursor)?;
        }

        Ok(FolderListing {
            name: folder.name.clone(),
            path: folder.path.clone(),
            files,
            subfolders,
        })
    }

    fn passes_gate(&self, folder: &RemoteFolder) -> bool {
        // Root folder has no name to gate on.
        if folder.path.is_empty() {
            return true;
        }
        match &self.gate {
            Some(gate) => filter::folder_qualifies(&folder.name, gate),
            None => true,
        }
    }
}

impl<'a, S: RemoteStore> Iterator for Walker<'a, S> {
    type Item = Result<FolderListing, RemoteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.aborted {
            return None;
        }
        loop {
            let folder = self.stack.pop()?;
            if !self.passes_gate(&folder) {
                debug!(folder = %folder.name, "folder gated out, skipping subtree");
                continue;
            }
            match self.list_all_pages(&folder) {
                Ok(listing) => {
                    // Reverse so the first sub-folder is popped first.
                    for sub in listing.subfolders.iter().rev() {
                        self.stack.push(sub.clone());
                    }
                    return Some(Ok(listing));
                }
                Err(err) => match self.failure_mode {
                    FailureMode::IsolateSubtree => {
                        warn!(path = %folder.path, error = %err, "listing failed, skipping subtree");
                        continue;
                    }
                    FailureMode::Abort => {
                        self.aborted = true;
                        return Some(Err(err));
                    }
                },
            }
        }
    }
}

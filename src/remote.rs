//! Remote hierarchical store: entry types, the [`RemoteStore`] trait, and
//! the Dropbox HTTP implementation.
//!
//! The sync core never talks to Dropbox directly — it goes through
//! [`RemoteStore`], which exposes exactly the four operations the pipeline
//! needs: list a folder (first page), continue a listing by cursor, and
//! download a file. Tests substitute an in-memory store.
//!
//! ## Traversal roots
//!
//! Two kinds of root are supported, matching the two harvesting modes:
//!
//! - [`RemoteRoot::Namespace`] — a full path inside the account, e.g.
//!   `/IPW Photos`. Listing and download use the regular `files/*`
//!   endpoints.
//! - [`RemoteRoot::SharedLink`] — a shared-collection URL. Listing passes
//!   the link alongside a link-relative path; downloads go through
//!   `sharing/get_shared_link_file`.
//!
//! All paths crossing the trait boundary are *root-relative* (`""` for the
//! root itself, otherwise `/Folder/file.jpg`); the client composes the
//! absolute form per root kind.
//!
//! ## Pagination
//!
//! Every listing call returns a [`Page`]: one batch of entries, an opaque
//! continuation cursor, and a `has_more` flag. The walker owns the loop that
//! drains cursors; the client performs exactly one round trip per call.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote API rejected {path:?}: {message}")]
    Api { path: String, message: String },
    #[error("credential exchange failed: {0}")]
    Auth(String),
}

/// One entry of a folder listing, file or sub-folder.
///
/// Names are plain (no path separators); root-relative paths are composed
/// by the walker, which knows which folder it asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEntry {
    File(RemoteFile),
    Folder(RemoteFolder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    /// Root-relative path, e.g. `/A-1/a-01.jpg`. Filled in by the walker.
    pub path: String,
    /// Server-side modification instant. Listings occasionally omit it;
    /// the change filter excludes such files with a logged reason.
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub name: String,
    /// Root-relative path, e.g. `/A-1`. Filled in by the walker.
    pub path: String,
}

/// One page of a folder listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub entries: Vec<RemoteEntry>,
    pub cursor: String,
    pub has_more: bool,
}

/// Where a traversal starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRoot {
    /// Absolute path inside the account namespace, e.g. `/IPW Photos`.
    Namespace(String),
    /// Shared-collection URL.
    SharedLink(String),
}

/// The four remote operations the sync core consumes.
pub trait RemoteStore {
    /// List the first page of a folder. `path` is root-relative (`""` for
    /// the root itself).
    fn list_folder(&self, root: &RemoteRoot, path: &str) -> Result<Page, RemoteError>;

    /// Exchange a continuation cursor for the next page.
    fn list_continue(&self, cursor: &str) -> Result<Page, RemoteError>;

    /// Fetch a file's payload.
    fn download(&self, root: &RemoteRoot, path: &str) -> Result<Vec<u8>, RemoteError>;
}

// ---------------------------------------------------------------------------
// Dropbox client
// ---------------------------------------------------------------------------

const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
const LIST_URL: &str = "https://api.dropboxapi.com/2/files/list_folder";
const LIST_CONTINUE_URL: &str = "https://api.dropboxapi.com/2/files/list_folder/continue";
const DOWNLOAD_URL: &str = "https://content.dropboxapi.com/2/files/download";
const SHARED_DOWNLOAD_URL: &str =
    "https://content.dropboxapi.com/2/sharing/get_shared_link_file";

/// OAuth refresh-token triple, loaded from the environment by
/// [`crate::config::DropboxCredentials`].
#[derive(Debug, Clone)]
pub struct DropboxAuth {
    pub refresh_token: String,
    pub app_key: String,
    pub app_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Wire shape of a Dropbox metadata entry. Entries the pipeline has no use
/// for (deleted markers, unknown tags) deserialize as `Unsupported` and are
/// dropped.
#[derive(Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
enum MetadataEntry {
    File {
        name: String,
        #[serde(default)]
        server_modified: Option<DateTime<Utc>>,
        #[serde(default)]
        client_modified: Option<DateTime<Utc>>,
    },
    Folder {
        name: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct ListFolderResponse {
    entries: Vec<MetadataEntry>,
    cursor: String,
    has_more: bool,
}

/// Blocking Dropbox REST client.
///
/// The access token is exchanged once at construction; a failed exchange is
/// a fatal configuration error and aborts the run before any work starts.
pub struct DropboxClient {
    http: reqwest::blocking::Client,
    access_token: String,
}

impl DropboxClient {
    /// Exchange the refresh token for an access token and return a ready
    /// client.
    pub fn connect(auth: &DropboxAuth) -> Result<Self, RemoteError> {
        let http = reqwest::blocking::Client::new();
        let response = http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", auth.refresh_token.as_str()),
                ("client_id", auth.app_key.as_str()),
                ("client_secret", auth.app_secret.as_str()),
            ])
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(RemoteError::Auth(format!("{status}: {body}")));
        }
        let token: TokenResponse = response.json()?;
        Ok(Self {
            http,
            access_token: token.access_token,
        })
    }

    fn call_api(
        &self,
        url: &str,
        path_for_errors: &str,
        body: serde_json::Value,
    ) -> Result<ListFolderResponse, RemoteError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(RemoteError::Api {
                path: path_for_errors.to_string(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(response.json()?)
    }

    fn into_page(raw: ListFolderResponse) -> Page {
        let entries = raw
            .entries
            .into_iter()
            .filter_map(|entry| match entry {
                MetadataEntry::File {
                    name,
                    server_modified,
                    client_modified,
                } => Some(RemoteEntry::File(RemoteFile {
                    name,
                    path: String::new(),
                    modified: server_modified.or(client_modified),
                })),
                MetadataEntry::Folder { name } => Some(RemoteEntry::Folder(RemoteFolder {
                    name,
                    path: String::new(),
                })),
                MetadataEntry::Unsupported => None,
            })
            .collect();
        Page {
            entries,
            cursor: raw.cursor,
            has_more: raw.has_more,
        }
    }
}

impl RemoteStore for DropboxClient {
    fn list_folder(&self, root: &RemoteRoot, path: &str) -> Result<Page, RemoteError> {
        let body = match root {
            RemoteRoot::Namespace(base) => json!({ "path": format!("{base}{path}") }),
            RemoteRoot::SharedLink(url) => json!({
                "path": path,
                "shared_link": { "url": url },
            }),
        };
        let raw = self.call_api(LIST_URL, path, body)?;
        Ok(Self::into_page(raw))
    }

    fn list_continue(&self, cursor: &str) -> Result<Page, RemoteError> {
        let raw = self.call_api(LIST_CONTINUE_URL, "<cursor>", json!({ "cursor": cursor }))?;
        Ok(Self::into_page(raw))
    }

    fn download(&self, root: &RemoteRoot, path: &str) -> Result<Vec<u8>, RemoteError> {
        let (url, arg) = match root {
            RemoteRoot::Namespace(base) => (
                DOWNLOAD_URL,
                json!({ "path": format!("{base}{path}") }),
            ),
            RemoteRoot::SharedLink(link) => (
                SHARED_DOWNLOAD_URL,
                json!({ "url": link, "path": path }),
            ),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", arg.to_string())
            .send()?;
        if !response.status().is_success() {
            return Err(RemoteError::Api {
                path: path.to_string(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_entry_parses_file_with_server_modified() {
        let json = r#"{
            ".tag": "file",
            "name": "a-01.jpg",
            "server_modified": "2026-08-15T10:00:00Z"
        }"#;
        let entry: MetadataEntry = serde_json::from_str(json).unwrap();
        assert!(matches!(
            entry,
            MetadataEntry::File { ref name, server_modified: Some(_), .. } if name == "a-01.jpg"
        ));
    }

    #[test]
    fn metadata_entry_parses_folder() {
        let json = r#"{ ".tag": "folder", "name": "A-1" }"#;
        let entry: MetadataEntry = serde_json::from_str(json).unwrap();
        assert!(matches!(entry, MetadataEntry::Folder { ref name } if name == "A-1"));
    }

    #[test]
    fn metadata_entry_unknown_tag_is_unsupported() {
        let json = r#"{ ".tag": "deleted", "name": "gone.jpg" }"#;
        let entry: MetadataEntry = serde_json::from_str(json).unwrap();
        assert!(matches!(entry, MetadataEntry::Unsupported));
    }

    #[test]
    fn into_page_drops_unsupported_and_keeps_order() {
        let raw: ListFolderResponse = serde_json::from_str(
            r#"{
                "entries": [
                    { ".tag": "folder", "name": "A-1" },
                    { ".tag": "deleted", "name": "old.jpg" },
                    { ".tag": "file", "name": "a-01.jpg",
                      "server_modified": "2026-08-15T10:00:00Z" }
                ],
                "cursor": "cursor-1",
                "has_more": true
            }"#,
        )
        .unwrap();

        let page = DropboxClient::into_page(raw);
        assert_eq!(page.entries.len(), 2);
        assert!(matches!(&page.entries[0], RemoteEntry::Folder(f) if f.name == "A-1"));
        assert!(matches!(&page.entries[1], RemoteEntry::File(f) if f.name == "a-01.jpg"));
        assert_eq!(page.cursor, "cursor-1");
        assert!(page.has_more);
    }

    #[test]
    fn file_without_server_modified_falls_back_to_client_modified() {
        let raw: ListFolderResponse = serde_json::from_str(
            r#"{
                "entries": [
                    { ".tag": "file", "name": "a.jpg",
                      "client_modified": "2026-07-01T00:00:00Z" }
                ],
                "cursor": "c",
                "has_more": false
            }"#,
        )
        .unwrap();

        let page = DropboxClient::into_page(raw);
        let RemoteEntry::File(file) = &page.entries[0] else {
            panic!("expected file entry");
        };
        assert!(file.modified.is_some());
    }
}

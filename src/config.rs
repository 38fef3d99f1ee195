//! Job configuration module.
//!
//! Handles loading and validating `rimsync.toml`. Every setting has a stock
//! default, so a missing config file is a valid (if unusual) setup; a file
//! only needs the keys it wants to override. Unknown keys are rejected to
//! catch typos early.
//!
//! Credentials never live in the config file — they come exclusively from
//! the environment ([`DropboxCredentials::from_env`],
//! [`FtpCredentials::from_env`]), so the file can be committed alongside
//! the catalog it describes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [remote]
//! path = ""                  # Namespace path to mirror ("" = app root)
//! # shared_link = "https://..."  # Harvest a shared collection instead
//! on_error = "isolate"       # "isolate" (skip failing subtree) or "abort"
//!
//! [filter]
//! extensions = ["jpg", "jpeg", "png"]
//! numeric_suffix_only = false
//! # folder_delimiter = "-"   # Enable the folder-name gate
//! excluded_folder_terms = []
//! min_files_per_folder = 0   # 0 disables the premature-folder guard
//!
//! [staging]
//! dir = "staging"
//!
//! [derivatives]
//! pre_box = [6000, 4000]     # Matting input bound (white canvas)
//! thumbnail_box = [400, 270]
//! icon_box = [500, 500]
//! thumbnail_dir = "images"
//! icon_dir = "PNG"
//!
//! [matting]
//! endpoint = "http://127.0.0.1:7000"
//! model = "isnet-general-use"
//!
//! [publish]
//! base_path = ""             # Remote directory prefix on the FTP host
//! policy = "skip"            # "skip" (leave existing files) or "replace"
//! ```

use crate::filter::{FileRules, FolderGate};
use crate::matting;
use crate::pipeline::DerivativeConfig;
use crate::publish::ConflictPolicy;
use crate::remote::{DropboxAuth, RemoteRoot};
use crate::walker::FailureMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
}

/// Job configuration loaded from `rimsync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub remote: RemoteConfig,
    pub filter: FilterConfig,
    pub staging: StagingConfig,
    pub derivatives: DerivativesConfig,
    pub matting: MattingConfig,
    pub publish: PublishConfig,
}

impl JobConfig {
    /// Validate config values and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "filter.extensions must not be empty".into(),
            ));
        }
        if !self.filter.excluded_folder_terms.is_empty()
            && self.filter.folder_delimiter.is_none()
        {
            return Err(ConfigError::Validation(
                "filter.excluded_folder_terms requires filter.folder_delimiter".into(),
            ));
        }
        for (name, [w, h]) in [
            ("derivatives.pre_box", self.derivatives.pre_box),
            ("derivatives.thumbnail_box", self.derivatives.thumbnail_box),
            ("derivatives.icon_box", self.derivatives.icon_box),
        ] {
            if w == 0 || h == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} dimensions must be non-zero"
                )));
            }
        }
        if self.matting.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "matting.endpoint must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Where the traversal starts and how listing errors are handled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Namespace path to mirror; `""` is the app root. Ignored when
    /// `shared_link` is set.
    pub path: String,
    /// Harvest a shared collection instead of the account namespace.
    pub shared_link: Option<String>,
    /// What a failed folder listing does to the run.
    pub on_error: ErrorMode,
}

impl RemoteConfig {
    pub fn root(&self) -> RemoteRoot {
        match &self.shared_link {
            Some(url) => RemoteRoot::SharedLink(url.clone()),
            None => RemoteRoot::Namespace(self.path.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    #[default]
    Isolate,
    Abort,
}

impl ErrorMode {
    pub fn failure_mode(self) -> FailureMode {
        match self {
            ErrorMode::Isolate => FailureMode::IsolateSubtree,
            ErrorMode::Abort => FailureMode::Abort,
        }
    }
}

/// Change-filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Allowed image extensions, lowercase, without the dot.
    pub extensions: Vec<String>,
    /// Require a numeric base-name suffix (`-04`, `_12`).
    pub numeric_suffix_only: bool,
    /// Enable the folder-name gate; folder names must contain this character.
    pub folder_delimiter: Option<char>,
    /// Case-insensitive substrings that disqualify a folder.
    pub excluded_folder_terms: Vec<String>,
    /// Minimum qualifying files before a folder is processed. 0 disables
    /// the guard.
    pub min_files_per_folder: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            numeric_suffix_only: false,
            folder_delimiter: None,
            excluded_folder_terms: Vec::new(),
            min_files_per_folder: 0,
        }
    }
}

impl FilterConfig {
    pub fn file_rules(&self) -> FileRules {
        FileRules {
            extensions: self.extensions.clone(),
            numeric_suffix_only: self.numeric_suffix_only,
        }
    }

    pub fn folder_gate(&self) -> Option<FolderGate> {
        self.folder_delimiter.map(|delimiter| FolderGate {
            required_delimiter: delimiter,
            excluded_substrings: self.excluded_folder_terms.clone(),
        })
    }
}

/// Local mirror location. The watermark and retry list live in this
/// directory too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagingConfig {
    pub dir: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: "staging".to_string(),
        }
    }
}

/// Derivative canvas sizes and output sub-directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DerivativesConfig {
    /// Matting input bound as `[width, height]`.
    pub pre_box: [u32; 2],
    /// Thumbnail canvas as `[width, height]`.
    pub thumbnail_box: [u32; 2],
    /// Icon canvas as `[width, height]`.
    pub icon_box: [u32; 2],
    pub thumbnail_dir: String,
    pub icon_dir: String,
}

impl Default for DerivativesConfig {
    fn default() -> Self {
        Self {
            pre_box: [6000, 4000],
            thumbnail_box: [400, 270],
            icon_box: [500, 500],
            thumbnail_dir: "images".to_string(),
            icon_dir: "PNG".to_string(),
        }
    }
}

impl DerivativesConfig {
    /// Combine with the filter's extension allowlist (cleanup deletes the
    /// same set of files the filter admits).
    pub fn derivative_config(&self, source_extensions: &[String]) -> DerivativeConfig {
        DerivativeConfig {
            pre_box: (self.pre_box[0], self.pre_box[1]),
            thumbnail_box: (self.thumbnail_box[0], self.thumbnail_box[1]),
            icon_box: (self.icon_box[0], self.icon_box[1]),
            thumbnail_dir: self.thumbnail_dir.clone(),
            icon_dir: self.icon_dir.clone(),
            source_extensions: source_extensions.to_vec(),
        }
    }
}

/// Background-removal service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MattingConfig {
    pub endpoint: String,
    pub model: String,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7000".to_string(),
            model: matting::DEFAULT_MODEL.to_string(),
        }
    }
}

/// FTP publish settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Remote directory prefix, e.g. `htdocs/rims`.
    pub base_path: String,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyConfig {
    #[default]
    Skip,
    Replace,
}

impl PolicyConfig {
    pub fn conflict_policy(self) -> ConflictPolicy {
        match self {
            PolicyConfig::Skip => ConflictPolicy::SkipIfPresent,
            PolicyConfig::Replace => ConflictPolicy::Replace,
        }
    }
}

/// Load config from the given file path.
///
/// A missing file yields the stock defaults; an existing file is parsed
/// (unknown keys rejected) and validated.
pub fn load_config(path: &Path) -> Result<JobConfig, ConfigError> {
    if !path.exists() {
        return Ok(JobConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: JobConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `rimsync.toml` with all keys and
/// explanations. Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# rimsync configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.
#
# Credentials are NOT read from this file. Set them in the environment:
#   DROPBOX_APP_KEY, DROPBOX_APP_SECRET, DROPBOX_REFRESH_TOKEN
#   FTP_HOST, FTP_USER, FTP_PASSWORD

# ---------------------------------------------------------------------------
# Remote source
# ---------------------------------------------------------------------------
[remote]
# Namespace path to mirror. "" mirrors the app root.
path = ""

# Harvest a shared collection instead of the account namespace.
# When set, `path` is ignored.
# shared_link = "https://www.dropbox.com/sh/..."

# What a failed folder listing does to the run:
#   "isolate" - log, skip that subtree, keep going
#   "abort"   - stop the run; the watermark is not advanced
on_error = "isolate"

# ---------------------------------------------------------------------------
# Change filter
# ---------------------------------------------------------------------------
[filter]
# Image extensions to mirror (lowercase, no dot).
extensions = ["jpg", "jpeg", "png"]

# Only mirror files whose base name ends in a numeric suffix ("-04", "_12").
numeric_suffix_only = false

# Folder-name gate: only descend into folders containing this character.
# folder_delimiter = "-"

# Case-insensitive terms that disqualify a folder (needs folder_delimiter),
# e.g. ["disc", "undone", "single drill", "828-1"]
excluded_folder_terms = []

# Skip folders with fewer qualifying files than this, unless one of them
# was modified in the current calendar month. 0 disables the guard.
min_files_per_folder = 0

# ---------------------------------------------------------------------------
# Local staging
# ---------------------------------------------------------------------------
[staging]
# Local mirror directory. Run state (.last-run, .retry.json) lives here too.
dir = "staging"

# ---------------------------------------------------------------------------
# Derivatives
# ---------------------------------------------------------------------------
[derivatives]
# Bounding box for background-removal inputs; larger images are shrunk onto
# a white canvas of exactly this size. Never cropped.
pre_box = [6000, 4000]

# Thumbnail canvas (transparent padding).
thumbnail_box = [400, 270]

# Per-folder icon canvas (transparent padding, first image of the run).
icon_box = [500, 500]

# Output sub-directories inside each processed folder.
thumbnail_dir = "images"
icon_dir = "PNG"

# ---------------------------------------------------------------------------
# Background removal service
# ---------------------------------------------------------------------------
[matting]
endpoint = "http://127.0.0.1:7000"
model = "isnet-general-use"

# ---------------------------------------------------------------------------
# FTP publish
# ---------------------------------------------------------------------------
[publish]
# Remote directory prefix under which folders are mirrored.
base_path = ""

# What to do when the remote already has a file:
#   "skip"    - leave it (derivative output is reproducible)
#   "replace" - delete and re-upload
policy = "skip"
"##
}

// =============================================================================
// Environment credentials
// =============================================================================

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

/// Dropbox OAuth credentials from the environment.
#[derive(Debug, Clone)]
pub struct DropboxCredentials(pub DropboxAuth);

impl DropboxCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self(DropboxAuth {
            app_key: required_env("DROPBOX_APP_KEY")?,
            app_secret: required_env("DROPBOX_APP_SECRET")?,
            refresh_token: required_env("DROPBOX_REFRESH_TOKEN")?,
        }))
    }
}

/// FTP credentials from the environment.
#[derive(Debug, Clone)]
pub struct FtpCredentials {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl FtpCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: required_env("FTP_HOST")?,
            user: required_env("FTP_USER")?,
            password: required_env("FTP_PASSWORD")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_validates() {
        let config = JobConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_config_values() {
        let config = JobConfig::default();
        assert_eq!(config.derivatives.pre_box, [6000, 4000]);
        assert_eq!(config.derivatives.thumbnail_box, [400, 270]);
        assert_eq!(config.derivatives.icon_box, [500, 500]);
        assert_eq!(config.derivatives.thumbnail_dir, "images");
        assert_eq!(config.derivatives.icon_dir, "PNG");
        assert_eq!(config.staging.dir, "staging");
        assert_eq!(config.matting.model, "isnet-general-use");
        assert_eq!(config.remote.on_error, ErrorMode::Isolate);
        assert_eq!(config.publish.policy, PolicyConfig::Skip);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[derivatives]
thumbnail_box = [200, 150]
"#;
        let config: JobConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.derivatives.thumbnail_box, [200, 150]);
        // Unspecified values keep their defaults.
        assert_eq!(config.derivatives.icon_box, [500, 500]);
        assert_eq!(config.staging.dir, "staging");
    }

    #[test]
    fn root_prefers_shared_link() {
        let mut remote = RemoteConfig::default();
        remote.path = "/IPW Photos".into();
        assert_eq!(remote.root(), RemoteRoot::Namespace("/IPW Photos".into()));

        remote.shared_link = Some("https://dropbox.test/sh/abc".into());
        assert_eq!(
            remote.root(),
            RemoteRoot::SharedLink("https://dropbox.test/sh/abc".into())
        );
    }

    #[test]
    fn folder_gate_requires_delimiter_setting() {
        let mut filter = FilterConfig::default();
        assert!(filter.folder_gate().is_none());

        filter.folder_delimiter = Some('-');
        filter.excluded_folder_terms = vec!["disc".into()];
        let gate = filter.folder_gate().unwrap();
        assert_eq!(gate.required_delimiter, '-');
        assert_eq!(gate.excluded_substrings, vec!["disc".to_string()]);
    }

    #[test]
    fn unknown_key_rejected() {
        let toml = r#"
[derivatives]
thumbnial_box = [200, 150]
"#;
        let result: Result<JobConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let toml = r#"
[derivativez]
icon_box = [1, 1]
"#;
        let result: Result<JobConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_zero_box() {
        let mut config = JobConfig::default();
        config.derivatives.icon_box = [0, 500];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_empty_extensions() {
        let mut config = JobConfig::default();
        config.filter.extensions = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_exclusions_without_delimiter() {
        let mut config = JobConfig::default();
        config.filter.excluded_folder_terms = vec!["disc".into()];
        assert!(config.validate().is_err());

        config.filter.folder_delimiter = Some('-');
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("rimsync.toml")).unwrap();
        assert_eq!(config.staging.dir, "staging");
    }

    #[test]
    fn load_config_reads_file_and_validates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rimsync.toml");
        fs::write(
            &path,
            r#"
[remote]
path = "/IPW Photos"
on_error = "abort"

[publish]
base_path = "htdocs/rims"
policy = "replace"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.remote.path, "/IPW Photos");
        assert_eq!(config.remote.on_error, ErrorMode::Abort);
        assert_eq!(config.publish.base_path, "htdocs/rims");
        assert_eq!(config.publish.policy, PolicyConfig::Replace);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rimsync.toml");
        fs::write(&path, "not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rimsync.toml");
        fs::write(
            &path,
            r#"
[derivatives]
pre_box = [0, 4000]
"#,
        )
        .unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn stock_config_toml_is_valid_and_matches_defaults() {
        let content = stock_config_toml();
        let config: JobConfig = toml::from_str(content).unwrap();
        assert!(config.validate().is_ok());

        let defaults = JobConfig::default();
        assert_eq!(config.derivatives.pre_box, defaults.derivatives.pre_box);
        assert_eq!(config.staging.dir, defaults.staging.dir);
        assert_eq!(config.matting.model, defaults.matting.model);
        assert_eq!(config.remote.on_error, defaults.remote.on_error);
        assert_eq!(config.publish.policy, defaults.publish.policy);
    }

    #[test]
    fn missing_env_is_a_named_error() {
        let err = required_env("RIMSYNC_TEST_UNSET_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(_)));
        assert!(err.to_string().contains("RIMSYNC_TEST_UNSET_VAR"));
    }
}

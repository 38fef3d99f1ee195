//! Change detection: which remote files and folders count as "new".
//!
//! Everything here is pure — decisions in, no I/O — so the rules that gate
//! network transfer are unit-testable without a remote.
//!
//! ## File rules (applied in order)
//!
//! 1. Extension must be on the image allowlist (case-insensitive).
//! 2. With a watermark set, the server modification instant must be
//!    *strictly* newer. Files without any usable instant are excluded;
//!    the caller logs the reason from [`Verdict::Exclude`].
//! 3. Optional: the base name must end in a numeric suffix (`-04`, `_12`) —
//!    used when harvesting a flat shared collection where only the numbered
//!    product shots matter.
//!
//! ## Folder rules
//!
//! - Optional gate, applied before any file-level filtering: the folder
//!   name must contain the required delimiter, must not contain any
//!   excluded substring, and no delimiter-separated segment may contain a
//!   double space (a recurring upload typo in the source catalog).
//! - Optional threshold: a folder is only processed once it holds at least
//!   `min_files` qualifying files and at least one of them was modified in
//!   the current calendar month — the guard against half-uploaded folders.

use crate::remote::RemoteFile;
use chrono::{DateTime, Datelike, Utc};

/// File-level filter settings.
#[derive(Debug, Clone)]
pub struct FileRules {
    /// Allowed extensions, lowercase, without the dot.
    pub extensions: Vec<String>,
    /// Require a `-NN` / `_NN` base-name suffix.
    pub numeric_suffix_only: bool,
}

impl Default for FileRules {
    fn default() -> Self {
        Self {
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            numeric_suffix_only: false,
        }
    }
}

/// Folder-name gate for shared-collection harvesting.
#[derive(Debug, Clone)]
pub struct FolderGate {
    pub required_delimiter: char,
    /// Case-insensitive substrings that disqualify a folder outright.
    pub excluded_substrings: Vec<String>,
}

/// Outcome of a file-level decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Include,
    Exclude(ExcludeReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeReason {
    NotAnImage,
    NoTimestamp,
    NotNewerThanWatermark,
    NoNumericSuffix,
}

impl std::fmt::Display for ExcludeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ExcludeReason::NotAnImage => "extension not on the image allowlist",
            ExcludeReason::NoTimestamp => "no usable modification timestamp",
            ExcludeReason::NotNewerThanWatermark => "not newer than the watermark",
            ExcludeReason::NoNumericSuffix => "base name has no numeric suffix",
        };
        f.write_str(text)
    }
}

/// Decide whether a remote file should be staged.
pub fn evaluate_file(
    file: &RemoteFile,
    watermark: Option<DateTime<Utc>>,
    rules: &FileRules,
) -> Verdict {
    if !extension_allowed(&file.name, &rules.extensions) {
        return Verdict::Exclude(ExcludeReason::NotAnImage);
    }
    if let Some(mark) = watermark {
        match file.modified {
            None => return Verdict::Exclude(ExcludeReason::NoTimestamp),
            Some(modified) if modified <= mark => {
                return Verdict::Exclude(ExcludeReason::NotNewerThanWatermark);
            }
            Some(_) => {}
        }
    }
    if rules.numeric_suffix_only && !has_numeric_suffix(stem(&file.name)) {
        return Verdict::Exclude(ExcludeReason::NoNumericSuffix);
    }
    Verdict::Include
}

/// Folder-level gate, applied before listing a folder's files at all.
pub fn folder_qualifies(name: &str, gate: &FolderGate) -> bool {
    if !name.contains(gate.required_delimiter) {
        return false;
    }
    let lower = name.to_lowercase();
    if gate
        .excluded_substrings
        .iter()
        .any(|sub| lower.contains(&sub.to_lowercase()))
    {
        return false;
    }
    // Double spaces inside a segment are upload typos, not real SKUs.
    !name
        .split(gate.required_delimiter)
        .any(|segment| segment.contains("  "))
}

/// Premature-folder guard: enough qualifying files, at least one of them
/// from the current calendar month.
pub fn folder_meets_threshold(
    files: &[&RemoteFile],
    min_files: usize,
    now: DateTime<Utc>,
) -> bool {
    if files.len() < min_files {
        return false;
    }
    files.iter().any(|file| {
        file.modified
            .is_some_and(|m| m.year() == now.year() && m.month() == now.month())
    })
}

fn extension_allowed(name: &str, extensions: &[String]) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_lowercase();
    extensions.iter().any(|allowed| *allowed == ext)
}

fn stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// `a-01` and `a_12` qualify; `a-`, `a01` and `a-b` do not.
fn has_numeric_suffix(stem: &str) -> bool {
    let Some(idx) = stem.rfind(['-', '_']) else {
        return false;
    };
    let suffix = &stem[idx + 1..];
    !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(name: &str, modified: Option<DateTime<Utc>>) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            path: format!("/A-1/{name}"),
            modified,
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    // =========================================================================
    // Extension rule
    // =========================================================================

    #[test]
    fn extensions_match_case_insensitively() {
        let rules = FileRules::default();
        for name in ["a.jpg", "a.JPG", "a.Jpeg", "a.PNG"] {
            assert_eq!(
                evaluate_file(&file(name, Some(at(2026, 8, 1, 0))), None, &rules),
                Verdict::Include,
                "{name} should be included"
            );
        }
    }

    #[test]
    fn non_images_are_excluded() {
        let rules = FileRules::default();
        for name in ["notes.txt", "a.pdf", "noext", "a.webp"] {
            assert_eq!(
                evaluate_file(&file(name, Some(at(2026, 8, 1, 0))), None, &rules),
                Verdict::Exclude(ExcludeReason::NotAnImage),
                "{name} should be excluded"
            );
        }
    }

    #[test]
    fn webp_included_when_on_allowlist() {
        let rules = FileRules {
            extensions: vec!["jpg".into(), "webp".into()],
            ..FileRules::default()
        };
        assert_eq!(
            evaluate_file(&file("a.webp", Some(at(2026, 8, 1, 0))), None, &rules),
            Verdict::Include
        );
    }

    // =========================================================================
    // Watermark rule
    // =========================================================================

    #[test]
    fn strictly_newer_than_watermark_is_included() {
        let rules = FileRules::default();
        let mark = Utc.with_ymd_and_hms(2026, 8, 15, 12, 0, 0).unwrap();

        let older = mark - chrono::Duration::seconds(1);
        let newer = mark + chrono::Duration::seconds(1);

        assert_eq!(
            evaluate_file(&file("a.jpg", Some(older)), Some(mark), &rules),
            Verdict::Exclude(ExcludeReason::NotNewerThanWatermark)
        );
        assert_eq!(
            evaluate_file(&file("a.jpg", Some(mark)), Some(mark), &rules),
            Verdict::Exclude(ExcludeReason::NotNewerThanWatermark)
        );
        assert_eq!(
            evaluate_file(&file("a.jpg", Some(newer)), Some(mark), &rules),
            Verdict::Include
        );
    }

    #[test]
    fn missing_timestamp_excluded_when_watermark_set() {
        let rules = FileRules::default();
        assert_eq!(
            evaluate_file(&file("a.jpg", None), Some(at(2026, 8, 1, 0)), &rules),
            Verdict::Exclude(ExcludeReason::NoTimestamp)
        );
    }

    #[test]
    fn missing_timestamp_allowed_without_watermark() {
        let rules = FileRules::default();
        assert_eq!(evaluate_file(&file("a.jpg", None), None, &rules), Verdict::Include);
    }

    // =========================================================================
    // Numeric suffix rule
    // =========================================================================

    #[test]
    fn numeric_suffix_mode_filters_base_names() {
        let rules = FileRules {
            numeric_suffix_only: true,
            ..FileRules::default()
        };
        let ts = Some(at(2026, 8, 1, 0));

        assert_eq!(evaluate_file(&file("W004-04.jpg", ts), None, &rules), Verdict::Include);
        assert_eq!(evaluate_file(&file("W004_12.jpg", ts), None, &rules), Verdict::Include);
        assert_eq!(
            evaluate_file(&file("W004-HB.jpg", ts), None, &rules),
            Verdict::Exclude(ExcludeReason::NoNumericSuffix)
        );
        assert_eq!(
            evaluate_file(&file("hero.jpg", ts), None, &rules),
            Verdict::Exclude(ExcludeReason::NoNumericSuffix)
        );
        assert_eq!(
            evaluate_file(&file("W004-.jpg", ts), None, &rules),
            Verdict::Exclude(ExcludeReason::NoNumericSuffix)
        );
    }

    // =========================================================================
    // Folder gate
    // =========================================================================

    fn gate() -> FolderGate {
        FolderGate {
            required_delimiter: '-',
            excluded_substrings: vec!["disc".into(), "undone".into(), "single drill".into()],
        }
    }

    #[test]
    fn folder_gate_requires_delimiter() {
        assert!(folder_qualifies("W004-HB", &gate()));
        assert!(!folder_qualifies("loose uploads", &gate()));
    }

    #[test]
    fn folder_gate_excludes_substrings_case_insensitively() {
        assert!(!folder_qualifies("W013-GM Discontinued", &gate()));
        assert!(!folder_qualifies("W023-BMF UNDONE", &gate()));
        assert!(!folder_qualifies("W101-Single Drill", &gate()));
    }

    #[test]
    fn folder_gate_rejects_double_space_segments() {
        assert!(!folder_qualifies("W215-SMF  v2", &gate()));
        assert!(folder_qualifies("W215-SMF v2", &gate()));
    }

    // =========================================================================
    // Folder threshold
    // =========================================================================

    #[test]
    fn threshold_needs_min_count_and_current_month() {
        let now = at(2026, 8, 27, 9);
        let this_month = file("a-01.jpg", Some(at(2026, 8, 10, 0)));
        let last_month = file("a-02.jpg", Some(at(2026, 7, 10, 0)));
        let also_old = file("a-03.jpg", Some(at(2026, 6, 1, 0)));

        // Two files, min 3 → below threshold.
        assert!(!folder_meets_threshold(&[&this_month, &last_month], 3, now));

        // Three files, one from this month → passes.
        assert!(folder_meets_threshold(
            &[&this_month, &last_month, &also_old],
            3,
            now
        ));

        // Three files, none from this month → blocked.
        assert!(!folder_meets_threshold(
            &[&last_month, &also_old, &also_old],
            3,
            now
        ));
    }

    #[test]
    fn threshold_ignores_files_without_timestamps_for_month_check() {
        let now = at(2026, 8, 27, 9);
        let undated = file("a-01.jpg", None);
        assert!(!folder_meets_threshold(&[&undated, &undated, &undated], 3, now));
    }

    #[test]
    fn zero_minimum_still_requires_current_month_file() {
        let now = at(2026, 8, 27, 9);
        let last_month = file("a-02.jpg", Some(at(2026, 7, 10, 0)));
        assert!(!folder_meets_threshold(&[&last_month], 0, now));
    }
}

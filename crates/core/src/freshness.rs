//! Freshness evaluation: decide whether the remote export is newer than the
//! last successful import.
//!
//! [`evaluate`] is a pure function. It never touches the filesystem and
//! returns the same result for the same inputs, so the orchestrator can call
//! it before committing to any downstream stage.

use serde::{Deserialize, Serialize};

use crate::files::{FileMetadata, ImportRecord};

// ---------------------------------------------------------------------------
// Reason strings
// ---------------------------------------------------------------------------

pub const REASON_NEW_FILE: &str = "new file";
pub const REASON_NEWER_TIMESTAMP: &str = "modification time is newer";
pub const REASON_SIZE_CHANGED: &str = "size differs";
pub const REASON_CHECKSUM_CHANGED: &str = "checksum differs";

pub const REASON_NO_PREVIOUS_IMPORT: &str = "no previous import found";
pub const REASON_PREVIOUS_FAILED: &str = "previous import did not succeed";
pub const REASON_DISABLED: &str = "freshness check disabled";
pub const REASON_NOTHING_NEWER: &str = "no newer files available";

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Which dimensions to compare, and what to do when nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessOptions {
    pub enabled: bool,
    pub compare_timestamp: bool,
    pub compare_size: bool,
    pub compare_checksum: bool,
    pub skip_if_not_newer: bool,
}

impl Default for FreshnessOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            compare_timestamp: true,
            compare_size: true,
            compare_checksum: false,
            skip_if_not_newer: true,
        }
    }
}

/// Pairwise comparison of one remote file against its last-imported record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileComparison {
    pub remote: FileMetadata,
    pub last_imported: Option<FileMetadata>,
    pub is_newer: bool,
    pub reasons: Vec<String>,
}

/// Outcome of one freshness evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshnessResult {
    pub should_import: bool,
    pub reason: String,
    pub remote_files: Vec<FileMetadata>,
    pub last_imported_files: Vec<FileMetadata>,
    pub comparisons: Vec<FileComparison>,
    /// True when every remote file must be imported, not only the newer ones.
    pub import_all: bool,
}

impl FreshnessResult {
    /// Remote files selected for download.
    pub fn selected_files(&self) -> Vec<FileMetadata> {
        if !self.should_import {
            return Vec::new();
        }
        if self.import_all {
            return self.remote_files.clone();
        }
        self.comparisons
            .iter()
            .filter(|c| c.is_newer)
            .map(|c| c.remote.clone())
            .collect()
    }

    pub fn newer_count(&self) -> usize {
        self.comparisons.iter().filter(|c| c.is_newer).count()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Compare one remote file against the last-imported entry with the same name.
pub fn compare_file(
    remote: &FileMetadata,
    last: Option<&FileMetadata>,
    options: &FreshnessOptions,
) -> FileComparison {
    let Some(last) = last else {
        let mut remote = remote.clone();
        remote.is_newer = true;
        return FileComparison {
            remote,
            last_imported: None,
            is_newer: true,
            reasons: vec![REASON_NEW_FILE.to_string()],
        };
    };

    let mut reasons = Vec::new();
    if options.compare_timestamp && remote.modified_at > last.modified_at {
        reasons.push(REASON_NEWER_TIMESTAMP.to_string());
    }
    if options.compare_size && remote.size != last.size {
        reasons.push(REASON_SIZE_CHANGED.to_string());
    }
    if options.compare_checksum {
        // Only comparable when both sides carry a checksum.
        if let (Some(a), Some(b)) = (&remote.checksum, &last.checksum) {
            if a != b {
                reasons.push(REASON_CHECKSUM_CHANGED.to_string());
            }
        }
    }

    let is_newer = !reasons.is_empty();
    let mut remote = remote.clone();
    remote.is_newer = is_newer;
    FileComparison {
        remote,
        last_imported: Some(last.clone()),
        is_newer,
        reasons,
    }
}

/// Decide whether an import is warranted.
pub fn evaluate(
    remote_files: &[FileMetadata],
    last_import: Option<&ImportRecord>,
    options: &FreshnessOptions,
) -> FreshnessResult {
    let last_files = last_import.map(|r| r.files.clone()).unwrap_or_default();

    let comparisons: Vec<FileComparison> = remote_files
        .iter()
        .map(|remote| {
            let last = last_import.and_then(|r| r.find(&remote.filename));
            compare_file(remote, last, options)
        })
        .collect();

    let remote_files: Vec<FileMetadata> =
        comparisons.iter().map(|c| c.remote.clone()).collect();

    let (should_import, import_all, reason) = decide(&comparisons, last_import, options);

    FreshnessResult {
        should_import,
        reason,
        remote_files,
        last_imported_files: last_files,
        comparisons,
        import_all,
    }
}

fn decide(
    comparisons: &[FileComparison],
    last_import: Option<&ImportRecord>,
    options: &FreshnessOptions,
) -> (bool, bool, String) {
    if !options.enabled {
        return (true, true, REASON_DISABLED.to_string());
    }

    let Some(last) = last_import else {
        return (true, true, REASON_NO_PREVIOUS_IMPORT.to_string());
    };
    if !last.success {
        return (true, true, REASON_PREVIOUS_FAILED.to_string());
    }

    let newer: Vec<String> = comparisons
        .iter()
        .filter(|c| c.is_newer)
        .map(|c| format!("{} ({})", c.remote.filename, c.reasons.join(", ")))
        .collect();

    if !newer.is_empty() {
        return (
            true,
            false,
            format!("{} newer file(s) found: {}", newer.len(), newer.join("; ")),
        );
    }

    if options.skip_if_not_newer {
        (false, false, REASON_NOTHING_NEWER.to_string())
    } else {
        (
            true,
            true,
            format!("{REASON_NOTHING_NEWER}; importing anyway (skip_if_not_newer disabled)"),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

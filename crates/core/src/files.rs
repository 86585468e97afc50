//! File metadata and the persisted last-import record.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Metadata for one dump file, either as listed on the remote host or as
/// recorded in the last-import checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
    pub modified_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Remote pattern the file name matched.
    #[serde(default)]
    pub pattern: String,
    /// Target database the file feeds, when its name identifies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub imported: bool,
    #[serde(default)]
    pub is_newer: bool,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, size: u64, modified_at: Timestamp) -> Self {
        Self {
            filename: filename.into(),
            size,
            modified_at,
            checksum: None,
            pattern: String::new(),
            database: None,
            imported: false,
            is_newer: false,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }
}

/// The durable record of the last successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub timestamp: Timestamp,
    pub success: bool,
    pub files: Vec<FileMetadata>,
}

impl ImportRecord {
    /// Look up a previously imported file by name.
    pub fn find(&self, filename: &str) -> Option<&FileMetadata> {
        self.files.iter().find(|f| f.filename == filename)
    }

    /// Build the record that follows `previous` after importing `imported`.
    ///
    /// Entries for files imported in this run replace older entries with the
    /// same name; untouched entries from the previous record are carried over
    /// so a partial (newer-files-only) run keeps the full baseline.
    pub fn merged(previous: Option<&ImportRecord>, imported: &[FileMetadata], at: Timestamp) -> Self {
        let mut files: Vec<FileMetadata> = previous
            .map(|p| {
                p.files
                    .iter()
                    .filter(|old| !imported.iter().any(|new| new.filename == old.filename))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        files.extend(imported.iter().cloned().map(|mut f| {
            f.imported = true;
            f.is_newer = false;
            f
        }));
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        Self {
            timestamp: at,
            success: true,
            files,
        }
    }
}

/// On-disk checkpoint document: `{"last_import": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastImportMetadata {
    #[serde(default)]
    pub last_import: Option<ImportRecord>,
}

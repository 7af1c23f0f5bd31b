//! Core data types that flow between the scanner, the synchronizer and the
//! remote service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Upload state of a local [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

/// A PDF discovered in the local documents directory.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// Path relative to the documents directory, `/`-separated.
    pub file_name: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    pub status: UploadStatus,
}

/// Indexing state of a file attached to a vector store, as reported remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteFileStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RemoteFileStatus {
    /// Files in these states count as present in the store.
    pub fn is_indexed(self) -> bool {
        matches!(self, RemoteFileStatus::InProgress | RemoteFileStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteFileStatus::InProgress => "in_progress",
            RemoteFileStatus::Completed => "completed",
            RemoteFileStatus::Failed => "failed",
            RemoteFileStatus::Cancelled => "cancelled",
        }
    }
}

/// One entry of a vector store's file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub file_id: String,
    /// `None` for files attached by something other than docq.
    pub content_hash: Option<String>,
    pub file_name: Option<String>,
    pub status: RemoteFileStatus,
    pub last_error: Option<String>,
}

/// Local reference to a remote vector store and the files it holds.
///
/// The store itself is owned by the service; this is an identifier plus the
/// most recently observed manifest.
/// A vector store id plus the manifest of files last listed from it, keyed by file id.
#[derive(Debug, Clone, Default)]
pub struct StoreHandle {
    pub store_id: String,
    files: HashMap<String, RemoteFile>,
}

impl StoreHandle {
    /// Handle with an empty manifest.
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            files: HashMap::new(),
        }
    }

    /// Replace the manifest with a fresh listing.
    pub fn set_manifest(&mut self, files: Vec<RemoteFile>) {
        self.files = files
            .into_iter()
            .map(|f| (f.file_id.clone(), f))
            .collect();
    }

    /// Record a file confirmed by the service.
    pub fn insert(&mut self, file: RemoteFile) {
        self.files.insert(file.file_id.clone(), file);
    }

    /// Drop a detached file from the manifest.
    pub fn remove(&mut self, file_id: &str) -> Option<RemoteFile> {
        self.files.remove(file_id)
    }

    /// Manifest entry for `file_id`, used to resolve citations.
    pub fn get(&self, file_id: &str) -> Option<&RemoteFile> {
        self.files.get(file_id)
    }

    /// Every manifest entry, in no particular order.
    pub fn files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.files.values()
    }

    /// The indexed entry carrying `hash`, if any.
    pub fn find_indexed(&self, hash: &str) -> Option<&RemoteFile> {
        self.files
            .values()
            .find(|f| f.status.is_indexed() && f.content_hash.as_deref() == Some(hash))
    }

    /// Entries carrying `hash` whose indexing failed or was cancelled.
    pub fn dead_entries(&self, hash: &str) -> Vec<&RemoteFile> {
        self.files
            .values()
            .filter(|f| !f.status.is_indexed() && f.content_hash.as_deref() == Some(hash))
            .collect()
    }

    /// Entries that count as present: completed or still indexing.
    pub fn indexed_count(&self) -> usize {
        self.files.values().filter(|f| f.status.is_indexed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed_count() == 0
    }
}

/// A question addressed to one store.
#[derive(Debug, Clone)]
pub struct Query {
    pub store_id: String,
    pub question: String,
}

/// A source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub file_id: String,
    /// Local document name, when the file id is known to the store handle.
    pub file_name: Option<String>,
    /// The marker text the assistant placed in the answer, e.g. `【4:0†a.pdf】`.
    pub marker: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl Answer {
    /// Distinct cited document names, in order of first appearance.
    pub fn cited_files(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for c in &self.citations {
            let name = c.file_name.as_deref().unwrap_or(c.file_id.as_str());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// A file that did not make it into the store during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub file_name: String,
    pub error: String,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedUpload>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.uploaded.len() + self.skipped.len() + self.failed.len()
    }

    /// Sort every list by file name so output does not depend on upload order.
    pub fn normalize(&mut self) {
        self.uploaded.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, hash: &str, status: RemoteFileStatus) -> RemoteFile {
        RemoteFile {
            file_id: id.to_string(),
            content_hash: Some(hash.to_string()),
            file_name: Some(format!("{}.pdf", id)),
            status,
            last_error: None,
        }
    }

    #[test]
    fn failed_entries_do_not_count_as_indexed() {
        let mut store = StoreHandle::new("vs_1");
        store.set_manifest(vec![
            remote("file-a", "aa", RemoteFileStatus::Completed),
            remote("file-b", "bb", RemoteFileStatus::Failed),
            remote("file-c", "cc", RemoteFileStatus::InProgress),
        ]);
        assert_eq!(store.indexed_count(), 2);
        assert!(store.find_indexed("aa").is_some());
        assert!(store.find_indexed("bb").is_none());
        assert_eq!(store.dead_entries("bb").len(), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn empty_handle_is_empty() {
        let mut store = StoreHandle::new("vs_1");
        assert!(store.is_empty());
        store.insert(remote("file-x", "xx", RemoteFileStatus::Cancelled));
        assert!(store.is_empty());
    }

    #[test]
    fn cited_files_are_distinct_and_ordered() {
        let answer = Answer {
            text: "see sources".into(),
            citations: vec![
                Citation {
                    file_id: "file-b".into(),
                    file_name: Some("b.pdf".into()),
                    marker: None,
                },
                Citation {
                    file_id: "file-a".into(),
                    file_name: Some("a.pdf".into()),
                    marker: None,
                },
                Citation {
                    file_id: "file-b".into(),
                    file_name: Some("b.pdf".into()),
                    marker: None,
                },
                Citation {
                    file_id: "file-z".into(),
                    file_name: None,
                    marker: None,
                },
            ],
        };
        assert_eq!(answer.cited_files(), vec!["b.pdf", "a.pdf", "file-z"]);
    }

    #[test]
    fn report_normalize_sorts_lists() {
        let mut report = SyncReport {
            uploaded: vec!["b.pdf".into(), "a.pdf".into()],
            skipped: vec![],
            failed: vec![
                FailedUpload {
                    file_name: "z.pdf".into(),
                    error: "x".into(),
                },
                FailedUpload {
                    file_name: "c.pdf".into(),
                    error: "y".into(),
                },
            ],
        };
        report.normalize();
        assert_eq!(report.uploaded, vec!["a.pdf", "b.pdf"]);
        assert_eq!(report.failed[0].file_name, "c.pdf");
        assert_eq!(report.total(), 4);
    }
}

//! Document store synchronization.
//!
//! Reconciles the local documents directory with the remote vector store:
//!
//! ```text
//! scan (hash) ──▶ list remote ──▶ plan ──▶ upload missing ──▶ SyncReport
//!                                   │
//!                                   └─ skip: already indexed
//! ```
//!
//! Deduplication is by content hash and happens locally before anything is
//! dispatched, so two uploads of the same bytes never race. A local copy of a
//! file being uploaded is settled with its twin: skipped if the twin made it
//! into the store, failed otherwise. Each upload is independent: a failure is
//! recorded in the report and the batch goes on.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{Config, DocumentsConfig};
use crate::error::{DocqError, Result};
use crate::models::{Document, FailedUpload, RemoteFile, StoreHandle, SyncReport, UploadStatus};
use crate::pdf;
use crate::progress::{FileOutcome, SyncProgressEvent, SyncProgressReporter};
use crate::remote::{UploadRequest, VectorStoreService};
use crate::scan;

/// Knobs for one sync run, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub upload_concurrency: usize,
    pub wait_for_indexing: bool,
    pub validate_pdf: bool,
    pub max_file_bytes: u64,
}

impl SyncOptions {
    /// Options taken from the `[sync]` and `[documents]` sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            upload_concurrency: config.sync.upload_concurrency.max(1),
            wait_for_indexing: config.sync.wait_for_indexing,
            validate_pdf: config.documents.validate_pdf,
            max_file_bytes: config.documents.max_file_bytes,
        }
    }
}

/// What a sync would do, computed without touching the network.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub to_upload: Vec<Document>,
    /// Content already indexed in the store.
    pub skipped: Vec<Document>,
    /// Byte-identical local copies of a file in `to_upload`, keyed by hash.
    /// They share the outcome of that upload.
    pub duplicates: HashMap<String, Vec<Document>>,
    /// Dead remote entries (failed / cancelled) per content hash, detached
    /// once the replacement upload succeeds.
    pub stale: HashMap<String, Vec<String>>,
}

impl SyncPlan {
    /// Local copies waiting on a twin's upload.
    pub fn duplicate_count(&self) -> usize {
        self.duplicates.values().map(Vec::len).sum()
    }
}

/// Result of [`sync`]: the report plus every document with its final status.
#[derive(Debug)]
pub struct SyncOutcome {
    pub report: SyncReport,
    pub documents: Vec<Document>,
}

/// Diff local documents against the store's manifest.
pub fn plan_sync(docs: Vec<Document>, store: &StoreHandle) -> SyncPlan {
    let (unique, duplicates) = scan::dedupe_by_hash(docs);
    let mut plan = SyncPlan::default();

    for mut doc in unique {
        if store.find_indexed(&doc.content_hash).is_some() {
            doc.status = UploadStatus::Uploaded;
            plan.skipped.push(doc);
            continue;
        }
        let dead: Vec<String> = store
            .dead_entries(&doc.content_hash)
            .into_iter()
            .map(|f| f.file_id.clone())
            .collect();
        if !dead.is_empty() {
            plan.stale.insert(doc.content_hash.clone(), dead);
        }
        plan.to_upload.push(doc);
    }

    for mut doc in duplicates {
        if store.find_indexed(&doc.content_hash).is_some() {
            doc.status = UploadStatus::Uploaded;
            plan.skipped.push(doc);
            continue;
        }
        debug!(file = %doc.file_name, "identical content already queued under another name");
        plan.duplicates
            .entry(doc.content_hash.clone())
            .or_default()
            .push(doc);
    }

    plan
}

/// Scan `local_dir` and reconcile it with `store`.
///
/// Refreshes the handle's manifest from the service, uploads whatever is
/// missing and records every confirmed upload in the handle.
///
/// # Errors
///
/// Scan failures (`Config`, `Io`) and a failed remote listing abort the
/// sync. Per-file upload failures never do; they land in
/// [`SyncReport::failed`].
pub async fn sync(
    local_dir: &DocumentsConfig,
    store: &mut StoreHandle,
    service: Arc<dyn VectorStoreService>,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncOutcome> {
    let docs = scan::scan_documents(local_dir)?;
    sync_documents(docs, store, service, options, progress).await
}

/// [`sync`] over an already scanned document list.
pub async fn sync_documents(
    docs: Vec<Document>,
    store: &mut StoreHandle,
    service: Arc<dyn VectorStoreService>,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncOutcome> {
    progress.report(SyncProgressEvent::Discovering {
        store_id: store.store_id.clone(),
    });
    let listing = service.list_files(&store.store_id).await?;
    store.set_manifest(listing);

    let mut plan = plan_sync(docs, store);
    let mut report = SyncReport::default();
    let mut documents = Vec::new();

    for doc in std::mem::take(&mut plan.skipped) {
        report.skipped.push(doc.file_name.clone());
        documents.push(doc);
    }

    let total = plan.to_upload.len() as u64;
    let mut finished = 0u64;
    let mut in_flight: HashMap<String, Document> = HashMap::new();
    let mut tasks: JoinSet<(String, Result<RemoteFile>)> = JoinSet::new();
    let concurrency = options.upload_concurrency.max(1);

    let mut queue = std::mem::take(&mut plan.to_upload).into_iter();
    loop {
        while tasks.len() < concurrency {
            let Some(doc) = queue.next() else { break };
            let name = doc.file_name.clone();
            tasks.spawn(upload_one(
                service.clone(),
                store.store_id.clone(),
                doc.clone(),
                options.clone(),
            ));
            in_flight.insert(name, doc);
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let (name, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!("upload task aborted: {}", e);
                continue;
            }
        };
        let Some(mut doc) = in_flight.remove(&name) else {
            continue;
        };
        finished += 1;

        let outcome = match result {
            Ok(remote) => {
                info!(file = %name, file_id = %remote.file_id, "uploaded");
                store.insert(remote);
                if let Some(dead) = plan.stale.get(&doc.content_hash) {
                    detach_stale(service.as_ref(), store, dead).await;
                }
                doc.status = UploadStatus::Uploaded;
                report.uploaded.push(name.clone());
                FileOutcome::Uploaded
            }
            Err(e) => {
                warn!(file = %name, "upload failed: {}", e);
                doc.status = UploadStatus::Failed;
                report.failed.push(FailedUpload {
                    file_name: name.clone(),
                    error: e.to_string(),
                });
                FileOutcome::Failed
            }
        };
        progress.report(SyncProgressEvent::Uploading {
            file: name,
            outcome,
            n: finished,
            total,
        });
        settle_duplicates(&mut plan.duplicates, &doc, &mut report, &mut documents);
        documents.push(doc);
    }

    // Tasks that panicked never reported back.
    for (name, mut doc) in in_flight {
        doc.status = UploadStatus::Failed;
        report.failed.push(FailedUpload {
            file_name: name,
            error: "upload task aborted".to_string(),
        });
        settle_duplicates(&mut plan.duplicates, &doc, &mut report, &mut documents);
        documents.push(doc);
    }

    progress.report(SyncProgressEvent::Finished {
        uploaded: report.uploaded.len() as u64,
        failed: report.failed.len() as u64,
    });
    report.normalize();
    documents.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(SyncOutcome { report, documents })
}

/// Give the local copies of `twin` the outcome of its upload.
fn settle_duplicates(
    pending: &mut HashMap<String, Vec<Document>>,
    twin: &Document,
    report: &mut SyncReport,
    documents: &mut Vec<Document>,
) {
    let Some(copies) = pending.remove(&twin.content_hash) else {
        return;
    };
    for mut copy in copies {
        copy.status = twin.status;
        if twin.status == UploadStatus::Uploaded {
            report.skipped.push(copy.file_name.clone());
        } else {
            report.failed.push(FailedUpload {
                file_name: copy.file_name.clone(),
                error: format!("duplicate of {}, which failed", twin.file_name),
            });
        }
        documents.push(copy);
    }
}

async fn upload_one(
    service: Arc<dyn VectorStoreService>,
    store_id: String,
    doc: Document,
    options: SyncOptions,
) -> (String, Result<RemoteFile>) {
    let name = doc.file_name.clone();
    let result = async {
        let request = prepare_upload(doc, &options).await?;
        service
            .upload_file(&store_id, request, options.wait_for_indexing)
            .await
    }
    .await;
    (name, result)
}

/// Read and validate a document locally. Anything rejected here never
/// reaches the network.
async fn prepare_upload(doc: Document, options: &SyncOptions) -> Result<UploadRequest> {
    let reject = |reason: String| DocqError::UploadRejected {
        file: doc.file_name.clone(),
        reason,
    };

    if doc.size_bytes > options.max_file_bytes {
        return Err(reject(format!(
            "file is {} bytes, limit is {}",
            doc.size_bytes, options.max_file_bytes
        )));
    }

    let bytes = Bytes::from(tokio::fs::read(&doc.path).await?);
    if scan::hash_bytes(&bytes) != doc.content_hash {
        return Err(reject("file changed while syncing".to_string()));
    }

    let checked = if options.validate_pdf {
        let shared = bytes.clone();
        tokio::task::spawn_blocking(move || pdf::validate(&shared))
            .await
            .map_err(|e| reject(format!("validation aborted: {}", e)))?
            .map(|_| bytes)
    } else {
        pdf::check_header(&bytes).map(|_| bytes)
    };
    let bytes = checked.map_err(|e| reject(e.to_string()))?;

    Ok(UploadRequest {
        file_name: doc.file_name.clone(),
        content_hash: doc.content_hash.clone(),
        bytes,
    })
}

async fn detach_stale(
    service: &dyn VectorStoreService,
    store: &mut StoreHandle,
    dead: &[String],
) {
    for file_id in dead {
        match service.detach_file(&store.store_id, file_id).await {
            Ok(()) => {
                store.remove(file_id);
            }
            Err(e) => warn!(%file_id, "failed to detach dead vector store entry: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteFileStatus;
    use std::path::PathBuf;

    fn doc(name: &str, hash: &str) -> Document {
        Document {
            path: PathBuf::from(name),
            file_name: name.to_string(),
            content_hash: hash.to_string(),
            size_bytes: 10,
            status: UploadStatus::Pending,
        }
    }

    fn remote(id: &str, hash: &str, status: RemoteFileStatus) -> RemoteFile {
        RemoteFile {
            file_id: id.to_string(),
            content_hash: Some(hash.to_string()),
            file_name: None,
            status,
            last_error: None,
        }
    }

    #[test]
    fn plan_skips_indexed_and_duplicates() {
        let mut store = StoreHandle::new("vs_1");
        store.set_manifest(vec![remote("file-a", "ha", RemoteFileStatus::Completed)]);

        let plan = plan_sync(
            vec![doc("a.pdf", "ha"), doc("b.pdf", "hb"), doc("b-copy.pdf", "hb")],
            &store,
        );

        let upload: Vec<&str> = plan.to_upload.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(upload, vec!["b.pdf"]);
        let skipped: Vec<&str> = plan.skipped.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(skipped, vec!["a.pdf"]);
        assert_eq!(plan.skipped[0].status, UploadStatus::Uploaded);
        assert_eq!(plan.duplicate_count(), 1);
        assert_eq!(plan.duplicates["hb"][0].file_name, "b-copy.pdf");
    }

    #[test]
    fn copy_of_indexed_content_is_skipped_outright() {
        let mut store = StoreHandle::new("vs_1");
        store.set_manifest(vec![remote("file-a", "ha", RemoteFileStatus::Completed)]);

        let plan = plan_sync(vec![doc("a.pdf", "ha"), doc("a-copy.pdf", "ha")], &store);
        assert!(plan.to_upload.is_empty());
        assert_eq!(plan.skipped.len(), 2);
        assert_eq!(plan.duplicate_count(), 0);
    }

    #[test]
    fn duplicates_follow_their_twin() {
        let mut pending = HashMap::new();
        pending.insert("hb".to_string(), vec![doc("b-copy.pdf", "hb")]);
        let mut twin = doc("b.pdf", "hb");
        twin.status = UploadStatus::Failed;
        let mut report = SyncReport::default();
        let mut documents = Vec::new();

        settle_duplicates(&mut pending, &twin, &mut report, &mut documents);

        assert!(pending.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(report.failed[0].file_name, "b-copy.pdf");
        assert_eq!(report.failed[0].error, "duplicate of b.pdf, which failed");
        assert_eq!(documents[0].status, UploadStatus::Failed);
    }

    #[test]
    fn plan_reuploads_failed_entries_and_marks_them_stale() {
        let mut store = StoreHandle::new("vs_1");
        store.set_manifest(vec![remote("file-old", "ha", RemoteFileStatus::Failed)]);

        let plan = plan_sync(vec![doc("a.pdf", "ha")], &store);
        assert_eq!(plan.to_upload.len(), 1);
        assert_eq!(plan.stale.get("ha"), Some(&vec!["file-old".to_string()]));
    }

    #[test]
    fn untagged_remote_files_never_match() {
        let mut store = StoreHandle::new("vs_1");
        store.set_manifest(vec![RemoteFile {
            file_id: "file-foreign".into(),
            content_hash: None,
            file_name: None,
            status: RemoteFileStatus::Completed,
            last_error: None,
        }]);
        let plan = plan_sync(vec![doc("a.pdf", "ha")], &store);
        assert_eq!(plan.to_upload.len(), 1);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_locally() {
        let options = SyncOptions {
            upload_concurrency: 1,
            wait_for_indexing: false,
            validate_pdf: false,
            max_file_bytes: 5,
        };
        let err = prepare_upload(doc("big.pdf", "h"), &options).await.unwrap_err();
        assert!(matches!(err, DocqError::UploadRejected { ref file, .. } if file == "big.pdf"));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_locally() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fake.pdf");
        std::fs::write(&path, b"plain text").unwrap();
        let mut d = doc("fake.pdf", &scan::hash_bytes(b"plain text"));
        d.path = path;
        let options = SyncOptions {
            upload_concurrency: 1,
            wait_for_indexing: false,
            validate_pdf: false,
            max_file_bytes: 1024,
        };
        let err = prepare_upload(d, &options).await.unwrap_err();
        assert!(err.to_string().contains("missing %PDF- header"));
    }
}

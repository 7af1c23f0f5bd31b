//! The remote service boundary.
//!
//! The synchronizer and the question flow depend only on [`VectorStoreService`].
//! [`crate::openai::OpenAiService`] is the production implementation; tests
//! plug in an in-memory fake.
//!
//! ```text
//!   sync ──▶ list_files / upload_file / detach_file ─┐
//!                                                     ├──▶ VectorStoreService
//!   ask  ──▶ create_thread / ask ─────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::models::{Answer, Query, RemoteFile};

/// A file about to be uploaded.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_hash: String,
    /// Cheap to clone, so retries reuse the same buffer.
    pub bytes: Bytes,
}

/// Remote vector store as seen by a metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub store_id: String,
    pub name: String,
    pub completed_files: u64,
}

/// Everything docq needs from the hosted service.
///
/// Implementations own retry and timeout handling: a transient fault that
/// outlives the retry budget comes back as
/// [`DocqError::RemoteUnavailable`](crate::error::DocqError::RemoteUnavailable).
#[async_trait]
pub trait VectorStoreService: Send + Sync {
    /// Create a new, empty vector store.
    async fn create_store(&self, name: &str) -> Result<StoreInfo>;

    /// Look up a store; `Ok(None)` if it no longer exists.
    async fn get_store(&self, store_id: &str) -> Result<Option<StoreInfo>>;

    /// List every file attached to the store.
    async fn list_files(&self, store_id: &str) -> Result<Vec<RemoteFile>>;

    /// Upload one document and attach it to the store.
    ///
    /// When `wait_for_indexing` is set, returns only once the service has
    /// finished processing the file; an indexing failure is reported as
    /// `UploadRejected`.
    async fn upload_file(
        &self,
        store_id: &str,
        request: UploadRequest,
        wait_for_indexing: bool,
    ) -> Result<RemoteFile>;

    /// Detach a file from the store and delete the underlying upload.
    async fn detach_file(&self, store_id: &str, file_id: &str) -> Result<()>;

    /// Create an assistant bound to the store; returns its id.
    async fn create_assistant(&self, store_id: &str) -> Result<String>;

    /// Reapply the configured model, instructions and store binding to an
    /// existing assistant.
    async fn update_assistant(&self, assistant_id: &str, store_id: &str) -> Result<()>;

    /// Whether an assistant id is still valid.
    async fn assistant_exists(&self, assistant_id: &str) -> Result<bool>;

    /// Start a conversation thread; returns its id.
    async fn create_thread(&self) -> Result<String>;

    /// Ask a question within a thread and wait for the generated answer.
    async fn ask(&self, assistant_id: &str, thread_id: &str, query: &Query) -> Result<Answer>;
}

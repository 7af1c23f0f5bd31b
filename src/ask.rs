//! Questions against the store.
//!
//! A [`Conversation`] owns one remote thread for the length of a session so
//! follow-up questions keep their context. The thread is created lazily on
//! the first question; if that fails the next question tries again.

use tracing::debug;

use crate::error::{DocqError, Result};
use crate::models::{Answer, Query, StoreHandle};
use crate::remote::VectorStoreService;

/// One question thread against an assistant. The thread is created on the
/// first question and reused for the rest of the conversation.
pub struct Conversation<'a> {
    service: &'a dyn VectorStoreService,
    assistant_id: String,
    thread_id: Option<String>,
}

impl<'a> Conversation<'a> {
    /// No thread exists until [`Conversation::ask`] first succeeds past the guards.
    pub fn new(service: &'a dyn VectorStoreService, assistant_id: impl Into<String>) -> Self {
        Self {
            service,
            assistant_id: assistant_id.into(),
            thread_id: None,
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Ask `question` against `store`.
    ///
    /// # Errors
    ///
    /// - `InvalidQuestion` for blank input.
    /// - `EmptyStore` when nothing is indexed; no remote call is made.
    /// - `RemoteUnavailable` when the service cannot be reached.
    pub async fn ask(&mut self, store: &StoreHandle, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DocqError::InvalidQuestion);
        }
        if store.is_empty() {
            return Err(DocqError::EmptyStore {
                store_id: store.store_id.clone(),
            });
        }

        let thread_id = match &self.thread_id {
            Some(id) => id.clone(),
            None => {
                let id = self.service.create_thread().await?;
                debug!(thread_id = %id, "started conversation thread");
                self.thread_id = Some(id.clone());
                id
            }
        };

        let query = Query {
            store_id: store.store_id.clone(),
            question: question.to_string(),
        };
        let mut answer = self
            .service
            .ask(&self.assistant_id, &thread_id, &query)
            .await?;
        resolve_citations(&mut answer, store);
        Ok(answer)
    }
}

/// Fill in local file names for cited remote files.
fn resolve_citations(answer: &mut Answer, store: &StoreHandle) {
    for citation in &mut answer.citations {
        if citation.file_name.is_none() {
            citation.file_name = store
                .get(&citation.file_id)
                .and_then(|f| f.file_name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Citation, RemoteFile, RemoteFileStatus};

    #[test]
    fn citations_resolve_to_local_names() {
        let mut store = StoreHandle::new("vs_1");
        store.insert(RemoteFile {
            file_id: "file-a".into(),
            content_hash: Some("ha".into()),
            file_name: Some("a.pdf".into()),
            status: RemoteFileStatus::Completed,
            last_error: None,
        });
        let mut answer = Answer {
            text: "x".into(),
            citations: vec![
                Citation {
                    file_id: "file-a".into(),
                    file_name: None,
                    marker: None,
                },
                Citation {
                    file_id: "file-unknown".into(),
                    file_name: None,
                    marker: None,
                },
            ],
        };
        resolve_citations(&mut answer, &store);
        assert_eq!(answer.citations[0].file_name.as_deref(), Some("a.pdf"));
        assert_eq!(answer.citations[1].file_name, None);
    }
}

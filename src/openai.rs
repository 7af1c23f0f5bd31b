//! OpenAI implementation of [`VectorStoreService`].
//!
//! Talks to the vector store, files and assistants (v2) endpoints under
//! `remote.base_url`. One [`reqwest::Client`] is built up front and reused for
//! every call.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) → retry
//! - HTTP 5xx (server error), network errors and timeouts → retry reads and
//!   deletes only; a `POST` that may have reached the server is not repeated
//! - Connection failures (request never sent) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Backoff: `retry_base_ms` × 1, 2, 4, … (capped at 2^5)
//!
//! Exhausted retries surface as [`DocqError::RemoteUnavailable`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{AssistantConfig, Config, RemoteConfig};
use crate::error::{DocqError, Result};
use crate::models::{Answer, Citation, Query, RemoteFile, RemoteFileStatus};
use crate::remote::{StoreInfo, UploadRequest, VectorStoreService};

/// Attribute keys written on every vector store file docq attaches.
pub const ATTR_HASH: &str = "sha256";
pub const ATTR_FILE_NAME: &str = "file_name";
/// The service caps attribute string values at 512 characters.
const MAX_ATTR_CHARS: usize = 512;
const LIST_PAGE_SIZE: u32 = 100;

/// Which failures a request may be re-sent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Reads and deletes: repeating them is harmless.
    Always,
    /// Creates: only re-sent when the server cannot have acted on them.
    Unsent,
}

pub struct OpenAiService {
    client: reqwest::Client,
    base_url: String,
    remote: RemoteConfig,
    assistant: AssistantConfig,
}

impl OpenAiService {
    /// Build the HTTP client.
    ///
    /// # Errors
    ///
    /// `Config` if the API key is not a valid header value or the client
    /// cannot be constructed.
    pub fn new(config: &Config, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| DocqError::Config("API key contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| DocqError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.remote.base_url.trim_end_matches('/').to_string(),
            remote: config.remote.clone(),
            assistant: config.assistant.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.remote.retry_base_ms << (attempt - 1).min(5))
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// `build` is called once per attempt since request bodies are consumed.
    async fn send_json<F>(&self, what: &str, retry: Retry, build: F) -> Result<Value>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.remote.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json::<Value>().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = error_message(&body_text);

                    let transient = status == StatusCode::TOO_MANY_REQUESTS
                        || (status.is_server_error() && retry == Retry::Always);
                    if transient {
                        warn!(%what, %status, attempt, "transient API error: {}", message);
                        last_err = Some(DocqError::RemoteUnavailable(format!(
                            "{} failed with {}: {}",
                            what, status, message
                        )));
                        continue;
                    }

                    if status.is_server_error() {
                        return Err(DocqError::RemoteUnavailable(format!(
                            "{} failed with {}: {}",
                            what, status, message
                        )));
                    }
                    return Err(DocqError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    warn!(%what, attempt, "request failed: {}", e);
                    let unsent = e.is_connect();
                    let err = DocqError::from(e);
                    if !err.is_retryable() || (retry == Retry::Unsent && !unsent) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            DocqError::RemoteUnavailable(format!("{} failed after retries", what))
        }))
    }

    async fn upload_raw(&self, request: &UploadRequest) -> Result<String> {
        let json = self
            .send_json("file upload", Retry::Unsent, || {
                let body = reqwest::Body::from(request.bytes.clone());
                let part = Part::stream_with_length(body, request.bytes.len() as u64)
                    .file_name(upload_file_name(&request.file_name));
                let form = Form::new().text("purpose", "assistants").part("file", part);
                self.client.post(self.url("/files")).multipart(form)
            })
            .await
            .map_err(|e| reject_client_errors(&request.file_name, e))?;
        required_str(&json, "id")
    }

    async fn attach(
        &self,
        store_id: &str,
        file_id: &str,
        request: &UploadRequest,
    ) -> Result<RemoteFile> {
        let mut attributes = serde_json::Map::new();
        attributes.insert(ATTR_HASH.into(), json!(request.content_hash));
        attributes.insert(
            ATTR_FILE_NAME.into(),
            json!(truncate_chars(&request.file_name, MAX_ATTR_CHARS)),
        );
        let body = json!({ "file_id": file_id, "attributes": attributes });
        let path = format!("/vector_stores/{}/files", store_id);
        let json = self
            .send_json("vector store attach", Retry::Unsent, || {
                self.client.post(self.url(&path)).json(&body)
            })
            .await
            .map_err(|e| reject_client_errors(&request.file_name, e))?;
        parse_vector_store_file(&json)
    }

    async fn get_store_file(&self, store_id: &str, file_id: &str) -> Result<RemoteFile> {
        let path = format!("/vector_stores/{}/files/{}", store_id, file_id);
        let json = self
            .send_json("vector store file lookup", Retry::Always, || {
                self.client.get(self.url(&path))
            })
            .await?;
        parse_vector_store_file(&json)
    }

    /// Poll an attached file until the service is done indexing it.
    async fn wait_until_indexed(
        &self,
        store_id: &str,
        mut file: RemoteFile,
    ) -> Result<RemoteFile> {
        let deadline = Instant::now() + Duration::from_secs(self.remote.max_poll_secs);
        while file.status == RemoteFileStatus::InProgress {
            if Instant::now() >= deadline {
                return Err(DocqError::RemoteUnavailable(format!(
                    "timed out waiting for {} to be indexed",
                    file.file_id
                )));
            }
            tokio::time::sleep(Duration::from_millis(self.remote.poll_interval_ms)).await;
            let hash = file.content_hash.take();
            let name = file.file_name.take();
            file = self.get_store_file(store_id, &file.file_id).await?;
            file.content_hash = file.content_hash.or(hash);
            file.file_name = file.file_name.or(name);
        }
        Ok(file)
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let path = format!("/files/{}", file_id);
        self.send_json("file delete", Retry::Always, || self.client.delete(self.url(&path)))
            .await?;
        Ok(())
    }

    fn assistant_body(&self, store_id: &str) -> Value {
        json!({
            "model": self.assistant.model,
            "instructions": self.assistant.instructions,
            "tools": [{ "type": "file_search" }],
            "tool_resources": {
                "file_search": { "vector_store_ids": [store_id] }
            },
        })
    }

    async fn wait_for_run(&self, thread_id: &str, run_id: &str) -> Result<String> {
        let deadline = Instant::now() + Duration::from_secs(self.remote.max_poll_secs);
        let path = format!("/threads/{}/runs/{}", thread_id, run_id);
        loop {
            let json = self
                .send_json("run status", Retry::Always, || self.client.get(self.url(&path)))
                .await?;
            let status = required_str(&json, "status")?;
            match status.as_str() {
                "completed" => return Ok(status.clone()),
                "failed" | "cancelled" | "expired" | "incomplete" => {
                    let detail = match json.pointer("/last_error/message").and_then(Value::as_str) {
                        Some(m) => format!("{} ({})", status, m),
                        None => status.clone(),
                    };
                    return Err(DocqError::RunFailed { status: detail });
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(DocqError::RemoteUnavailable(format!(
                    "timed out waiting for run {}",
                    run_id
                )));
            }
            debug!(%run_id, %status, "waiting for run");
            tokio::time::sleep(Duration::from_millis(self.remote.poll_interval_ms)).await;
        }
    }
}

#[async_trait]
impl VectorStoreService for OpenAiService {
    async fn create_store(&self, name: &str) -> Result<StoreInfo> {
        let body = json!({ "name": name });
        let json = self
            .send_json("vector store create", Retry::Unsent, || {
                self.client.post(self.url("/vector_stores")).json(&body)
            })
            .await?;
        parse_store(&json)
    }

    async fn get_store(&self, store_id: &str) -> Result<Option<StoreInfo>> {
        let path = format!("/vector_stores/{}", store_id);
        match self
            .send_json("vector store lookup", Retry::Always, || self.client.get(self.url(&path)))
            .await
        {
            Ok(json) => Ok(Some(parse_store(&json)?)),
            Err(DocqError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_files(&self, store_id: &str) -> Result<Vec<RemoteFile>> {
        let path = format!("/vector_stores/{}/files", store_id);
        let mut files = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let json = self
                .send_json("vector store listing", Retry::Always, || {
                    let mut req = self
                        .client
                        .get(self.url(&path))
                        .query(&[("limit", LIST_PAGE_SIZE.to_string())]);
                    if let Some(cursor) = &after {
                        req = req.query(&[("after", cursor.as_str())]);
                    }
                    req
                })
                .await?;

            let page = parse_file_page(&json)?;
            let last_id = page.files.last().map(|f| f.file_id.clone());
            files.extend(page.files);

            match (page.has_more, last_id) {
                (true, Some(id)) => after = Some(id),
                _ => break,
            }
        }

        debug!(%store_id, count = files.len(), "listed vector store files");
        Ok(files)
    }

    async fn upload_file(
        &self,
        store_id: &str,
        request: UploadRequest,
        wait_for_indexing: bool,
    ) -> Result<RemoteFile> {
        let file_id = self.upload_raw(&request).await?;

        let mut attached = match self.attach(store_id, &file_id, &request).await {
            Ok(f) => f,
            Err(e) => {
                if let Err(cleanup) = self.delete_file(&file_id).await {
                    warn!(%file_id, "failed to delete orphaned upload: {}", cleanup);
                }
                return Err(e);
            }
        };
        attached.content_hash = Some(request.content_hash.clone());
        attached.file_name = Some(request.file_name.clone());

        if !wait_for_indexing {
            return Ok(attached);
        }

        let indexed = self.wait_until_indexed(store_id, attached).await?;
        if indexed.status.is_indexed() {
            return Ok(indexed);
        }

        if let Err(cleanup) = self.detach_file(store_id, &indexed.file_id).await {
            warn!(file_id = %indexed.file_id, "failed to detach rejected file: {}", cleanup);
        }
        Err(DocqError::UploadRejected {
            file: request.file_name,
            reason: indexed
                .last_error
                .unwrap_or_else(|| format!("indexing {}", indexed.status.as_str())),
        })
    }

    async fn detach_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        let path = format!("/vector_stores/{}/files/{}", store_id, file_id);
        match self
            .send_json("vector store detach", Retry::Always, || self.client.delete(self.url(&path)))
            .await
        {
            Ok(_) | Err(DocqError::Api { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }
        match self.delete_file(file_id).await {
            Ok(()) | Err(DocqError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_assistant(&self, store_id: &str) -> Result<String> {
        let body = self.assistant_body(store_id);
        let json = self
            .send_json("assistant create", Retry::Unsent, || {
                self.client.post(self.url("/assistants")).json(&body)
            })
            .await?;
        required_str(&json, "id")
    }

    async fn update_assistant(&self, assistant_id: &str, store_id: &str) -> Result<()> {
        let body = self.assistant_body(store_id);
        let path = format!("/assistants/{}", assistant_id);
        self.send_json("assistant update", Retry::Always, || {
            self.client.post(self.url(&path)).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn assistant_exists(&self, assistant_id: &str) -> Result<bool> {
        let path = format!("/assistants/{}", assistant_id);
        match self
            .send_json("assistant lookup", Retry::Always, || self.client.get(self.url(&path)))
            .await
        {
            Ok(_) => Ok(true),
            Err(DocqError::Api { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_thread(&self) -> Result<String> {
        let body = json!({});
        let json = self
            .send_json("thread create", Retry::Unsent, || {
                self.client.post(self.url("/threads")).json(&body)
            })
            .await?;
        required_str(&json, "id")
    }

    async fn ask(&self, assistant_id: &str, thread_id: &str, query: &Query) -> Result<Answer> {
        let messages_path = format!("/threads/{}/messages", thread_id);
        let message = json!({ "role": "user", "content": query.question });
        self.send_json("message create", Retry::Unsent, || {
            self.client.post(self.url(&messages_path)).json(&message)
        })
        .await?;

        let runs_path = format!("/threads/{}/runs", thread_id);
        let run_body = json!({ "assistant_id": assistant_id });
        let run = self
            .send_json("run create", Retry::Unsent, || {
                self.client.post(self.url(&runs_path)).json(&run_body)
            })
            .await?;
        let run_id = required_str(&run, "id")?;

        self.wait_for_run(thread_id, &run_id).await?;

        let json = self
            .send_json("message listing", Retry::Always, || {
                self.client.get(self.url(&messages_path)).query(&[
                    ("limit", "10"),
                    ("order", "desc"),
                    ("run_id", run_id.as_str()),
                ])
            })
            .await?;
        parse_answer(&json)
    }
}

struct FilePage {
    files: Vec<RemoteFile>,
    has_more: bool,
}

fn required_str(json: &Value, key: &str) -> Result<String> {
    json.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DocqError::Api {
            status: 200,
            message: format!("response missing '{}'", key),
        })
}

fn parse_store(json: &Value) -> Result<StoreInfo> {
    Ok(StoreInfo {
        store_id: required_str(json, "id")?,
        name: json
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        completed_files: json
            .pointer("/file_counts/completed")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

fn parse_status(raw: &str) -> RemoteFileStatus {
    match raw {
        "completed" => RemoteFileStatus::Completed,
        "failed" => RemoteFileStatus::Failed,
        "cancelled" => RemoteFileStatus::Cancelled,
        _ => RemoteFileStatus::InProgress,
    }
}

fn parse_vector_store_file(json: &Value) -> Result<RemoteFile> {
    let attr = |key: &str| {
        json.get("attributes")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    Ok(RemoteFile {
        file_id: required_str(json, "id")?,
        content_hash: attr(ATTR_HASH),
        file_name: attr(ATTR_FILE_NAME),
        status: parse_status(json.get("status").and_then(Value::as_str).unwrap_or("")),
        last_error: json
            .pointer("/last_error/message")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_file_page(json: &Value) -> Result<FilePage> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| DocqError::Api {
            status: 200,
            message: "listing response missing data array".into(),
        })?;
    let files = data
        .iter()
        .map(parse_vector_store_file)
        .collect::<Result<Vec<_>>>()?;
    Ok(FilePage {
        files,
        has_more: json
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Extract the newest assistant message's text and file citations.
fn parse_answer(json: &Value) -> Result<Answer> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| DocqError::Api {
            status: 200,
            message: "message listing missing data array".into(),
        })?;

    let message = data
        .iter()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"));

    let mut text_parts = Vec::new();
    let mut citations = Vec::new();

    if let Some(message) = message {
        let content = message
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item in content {
            if item.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            if let Some(value) = item.pointer("/text/value").and_then(Value::as_str) {
                text_parts.push(value.to_string());
            }
            let annotations = item
                .pointer("/text/annotations")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for ann in annotations {
                if let Some(file_id) = ann.pointer("/file_citation/file_id").and_then(Value::as_str)
                {
                    citations.push(Citation {
                        file_id: file_id.to_string(),
                        file_name: None,
                        marker: ann.get("text").and_then(Value::as_str).map(str::to_string),
                    });
                }
            }
        }
    }

    Ok(Answer {
        text: text_parts.join("\n"),
        citations,
    })
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// 4xx responses to an upload mean the service refused this particular file.
fn reject_client_errors(file_name: &str, err: DocqError) -> DocqError {
    match err {
        DocqError::Api { status, message } if (400..500).contains(&status) => {
            DocqError::UploadRejected {
                file: file_name.to_string(),
                reason: format!("{} ({})", message, status),
            }
        }
        other => other,
    }
}

fn upload_file_name(file_name: &str) -> String {
    file_name
        .rsplit('/')
        .next()
        .unwrap_or(file_name)
        .to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_page_with_attributes() {
        let json = json!({
            "object": "list",
            "data": [
                {
                    "id": "file-1",
                    "status": "completed",
                    "attributes": { "sha256": "abc", "file_name": "a.pdf" }
                },
                {
                    "id": "file-2",
                    "status": "failed",
                    "last_error": { "code": "unsupported_file", "message": "bad file" }
                }
            ],
            "has_more": true
        });
        let page = parse_file_page(&json).unwrap();
        assert!(page.has_more);
        assert_eq!(page.files.len(), 2);
        assert_eq!(page.files[0].content_hash.as_deref(), Some("abc"));
        assert_eq!(page.files[0].status, RemoteFileStatus::Completed);
        assert_eq!(page.files[1].content_hash, None);
        assert_eq!(page.files[1].status, RemoteFileStatus::Failed);
        assert_eq!(page.files[1].last_error.as_deref(), Some("bad file"));
    }

    #[test]
    fn listing_without_data_is_an_error() {
        assert!(parse_file_page(&json!({ "has_more": false })).is_err());
    }

    #[test]
    fn parses_answer_text_and_citations() {
        let json = json!({
            "data": [
                {
                    "role": "assistant",
                    "content": [
                        {
                            "type": "text",
                            "text": {
                                "value": "Alpha covers Rust【4:0†a.pdf】.",
                                "annotations": [
                                    {
                                        "type": "file_citation",
                                        "text": "【4:0†a.pdf】",
                                        "file_citation": { "file_id": "file-a" }
                                    }
                                ]
                            }
                        },
                        { "type": "image_file", "image_file": { "file_id": "img" } }
                    ]
                },
                {
                    "role": "user",
                    "content": [{ "type": "text", "text": { "value": "q", "annotations": [] } }]
                }
            ]
        });
        let answer = parse_answer(&json).unwrap();
        assert_eq!(answer.text, "Alpha covers Rust【4:0†a.pdf】.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].file_id, "file-a");
        assert_eq!(answer.citations[0].marker.as_deref(), Some("【4:0†a.pdf】"));
    }

    #[test]
    fn answer_without_assistant_message_is_empty() {
        let json = json!({ "data": [ { "role": "user", "content": [] } ] });
        let answer = parse_answer(&json).unwrap();
        assert!(answer.text.is_empty());
        assert!(answer.citations.is_empty());
    }

    #[test]
    fn error_message_prefers_api_message() {
        assert_eq!(
            error_message(r#"{"error":{"message":"File too large","type":"invalid_request_error"}}"#),
            "File too large"
        );
        assert_eq!(error_message("  upstream timeout "), "upstream timeout");
    }

    #[test]
    fn client_errors_on_upload_become_rejections() {
        let err = reject_client_errors(
            "big.pdf",
            DocqError::Api {
                status: 413,
                message: "too large".into(),
            },
        );
        assert!(matches!(err, DocqError::UploadRejected { ref file, .. } if file == "big.pdf"));

        let err = reject_client_errors("a.pdf", DocqError::RemoteUnavailable("reset".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn upload_name_drops_directories() {
        assert_eq!(upload_file_name("reports/2024/q1.pdf"), "q1.pdf");
        assert_eq!(upload_file_name("a.pdf"), "a.pdf");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut config = Config::default();
        config.remote.retry_base_ms = 10;
        let service = OpenAiService::new(&config, "sk-test").unwrap();
        assert_eq!(service.backoff(1), Duration::from_millis(10));
        assert_eq!(service.backoff(2), Duration::from_millis(20));
        assert_eq!(service.backoff(4), Duration::from_millis(80));
        assert_eq!(service.backoff(20), Duration::from_millis(320));
    }
}

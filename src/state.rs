//! Persisted local state.
//!
//! The vector store and assistant are created once and reused across runs;
//! their ids live in a small JSON file (`state.path`). The remote manifest is
//! not cached here: it is always re-listed, so a stale local file can never
//! cause a skipped upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::{AssistantConfig, Config};
use crate::error::Result;
use crate::remote::VectorStoreService;
use crate::scan;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub store_id: Option<String>,
    pub store_name: Option<String>,
    pub assistant_id: Option<String>,
    /// Hash of the model and instructions the assistant was last configured
    /// with; a mismatch with the current config triggers an update.
    #[serde(default)]
    pub assistant_fingerprint: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl State {
    /// Read the state file; a missing file yields the empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Ids the rest of the run works against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub store_id: String,
    pub assistant_id: String,
}

/// Identifies the assistant settings in `config` that live on the service.
pub fn assistant_fingerprint(config: &AssistantConfig) -> String {
    scan::hash_bytes(format!("{}\n{}", config.model, config.instructions).as_bytes())
}

/// Reuse the persisted store and assistant, creating whichever is missing.
///
/// A new store invalidates the persisted assistant, since an assistant is
/// bound to one store at creation. A reused assistant whose model or
/// instructions differ from the config is updated in place.
pub async fn ensure_provisioned(
    config: &Config,
    service: &dyn VectorStoreService,
) -> Result<Provisioned> {
    let path = &config.state.path;
    let mut state = State::load(path)?;
    let before = state.clone();

    let existing = match state.store_id.as_deref() {
        Some(id) => service.get_store(id).await?,
        None => None,
    };

    let store_id = match existing {
        Some(store) => store.store_id,
        None => {
            if let Some(stale) = &state.store_id {
                warn!(store_id = %stale, "persisted vector store no longer exists; creating a new one");
            }
            let created = service
                .create_store(&config.assistant.vector_store_name)
                .await?;
            info!(store_id = %created.store_id, name = %created.name, "created vector store");
            state.store_id = Some(created.store_id.clone());
            state.store_name = Some(created.name);
            state.assistant_id = None;
            state.created_at = Some(Utc::now());
            created.store_id
        }
    };

    let reusable = match state.assistant_id.as_deref() {
        Some(id) => service.assistant_exists(id).await?,
        None => false,
    };
    let fingerprint = assistant_fingerprint(&config.assistant);
    let assistant_id = match (&state.assistant_id, reusable) {
        (Some(id), true) => {
            let id = id.clone();
            if state.assistant_fingerprint.as_deref() != Some(fingerprint.as_str()) {
                service.update_assistant(&id, &store_id).await?;
                info!(
                    assistant_id = %id,
                    model = %config.assistant.model,
                    "updated assistant settings"
                );
            }
            id
        }
        _ => {
            let id = service.create_assistant(&store_id).await?;
            info!(assistant_id = %id, "created assistant");
            state.assistant_id = Some(id.clone());
            id
        }
    };
    state.assistant_fingerprint = Some(fingerprint);

    if state != before {
        state.save(path)?;
    }

    Ok(Provisioned {
        store_id,
        assistant_id,
    })
}

/// Stamp `last_sync_at` after a completed sync.
pub fn record_sync(path: &Path) -> Result<()> {
    let mut state = State::load(path)?;
    state.last_sync_at = Some(Utc::now());
    state.save(path)
}

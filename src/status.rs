//! Store overview for `docq status`.
//!
//! Shows which store and assistant the local state points at, the remote
//! file counts per indexing status, and whether each local document is
//! already in the store. Read-only: nothing is created or uploaded.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::config::Config;
use crate::error::Result;
use crate::models::{Document, StoreHandle};
use crate::remote::VectorStoreService;
use crate::scan;
use crate::state::State;

/// Print the status overview to stdout.
///
/// A missing store id or a store the service no longer has is reported, not
/// treated as an error.
pub async fn run_status(config: &Config, service: &dyn VectorStoreService) -> Result<()> {
    let state = State::load(&config.state.path)?;
    let docs = if config.documents.dir.is_dir() {
        scan::scan_documents(&config.documents)?
    } else {
        Vec::new()
    };

    let store = match state.store_id.as_deref() {
        Some(id) => match service.get_store(id).await? {
            Some(_) => {
                let mut handle = StoreHandle::new(id);
                handle.set_manifest(service.list_files(id).await?);
                Some(handle)
            }
            None => None,
        },
        None => None,
    };

    print!("{}", render_status(config, &state, store.as_ref(), &docs));
    Ok(())
}

/// Plain-text overview of the persisted ids and document counts.
pub fn render_status(
    config: &Config,
    state: &State,
    store: Option<&StoreHandle>,
    docs: &[Document],
) -> String {
    let mut out = String::new();
    let none = "(none)";

    let _ = writeln!(out, "docq status");
    let _ = writeln!(out, "===========");
    let _ = writeln!(out);
    let _ = writeln!(out, "  Documents dir: {}", config.documents.dir.display());
    let _ = writeln!(out, "  State file:    {}", config.state.path.display());
    let _ = writeln!(
        out,
        "  Vector store:  {}",
        state.store_id.as_deref().unwrap_or(none)
    );
    let _ = writeln!(
        out,
        "  Assistant:     {}",
        state.assistant_id.as_deref().unwrap_or(none)
    );
    let _ = writeln!(
        out,
        "  Last sync:     {}",
        state
            .last_sync_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );

    let Some(store) = store else {
        if state.store_id.is_some() {
            let _ = writeln!(out, "\n  The persisted vector store no longer exists remotely.");
        } else {
            let _ = writeln!(out, "\n  No vector store yet. Run `docq sync` to create one.");
        }
        return out;
    };

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for file in store.files() {
        *by_status.entry(file.status.as_str()).or_default() += 1;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  Remote files:  {}", store.files().count());
    for (status, count) in &by_status {
        let _ = writeln!(out, "    {:<12} {}", status, count);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "  {:<40} {:>10}  INDEXED", "DOCUMENT", "BYTES");
    for doc in docs {
        let indexed = store.find_indexed(&doc.content_hash).is_some();
        let _ = writeln!(
            out,
            "  {:<40} {:>10}  {}",
            doc.file_name,
            doc.size_bytes,
            if indexed { "yes" } else { "no" }
        );
    }
    let indexed = docs
        .iter()
        .filter(|d| store.find_indexed(&d.content_hash).is_some())
        .count();
    let _ = writeln!(out);
    let _ = writeln!(out, "  {} / {} local documents indexed", indexed, docs.len());
    out
}

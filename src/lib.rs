//! # docq
//!
//! Keep a folder of PDFs in sync with a hosted vector store and ask questions
//! about them through a retrieval-backed assistant.
//!
//! All embedding, search and generation happens on the service. docq owns the
//! document lifecycle: which local files are already in the store, which
//! need uploading, and never uploading the same bytes twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ scan (hash) │──▶│ sync (diff + │──▶│ VectorStoreService │
//! │  ./assets   │   │   upload)    │   │  (OpenAI, remote)  │
//! └─────────────┘   └──────────────┘   └─────────┬──────────┘
//!                                                │
//!                   ┌──────────────┐             │
//!                   │ session/ask  │◀────────────┘
//!                   │  (stdin)     │
//!                   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential loading |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`scan`] | Local PDF discovery and hashing |
//! | [`pdf`] | Local PDF validation |
//! | [`remote`] | Remote service trait |
//! | [`openai`] | OpenAI implementation of the remote service |
//! | [`sync`] | Local/remote reconciliation |
//! | [`ask`] | Questions and conversation threads |
//! | [`session`] | Interactive loop |
//! | [`state`] | Persisted store and assistant ids |
//! | [`progress`] | Upload progress on stderr |
//! | [`status`] | Store overview |

pub mod ask;
pub mod config;
pub mod error;
pub mod models;
pub mod openai;
pub mod pdf;
pub mod progress;
pub mod remote;
pub mod scan;
pub mod session;
pub mod state;
pub mod status;
pub mod sync;

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod entry;
pub mod error;
pub mod journal;
pub mod memory;
pub mod store;

pub use entry::{CostStats, Entry, Metadata, TokenStats, ToolExecutionRecord};
pub use error::ConversationStoreError;
pub use journal::JournalStore;
pub use memory::MemoryStore;
pub use store::ConversationStore;

/// Construct a store from a backend tag, matching `StorageConfig::backend`.
/// `relational` and `kv` are recognised tags reserved for future backends
/// implementing the same trait; only `journal` and `memory` are wired here.
pub fn from_backend_tag(backend: &str, journal_dir: impl Into<std::path::PathBuf>) -> anyhow::Result<std::sync::Arc<dyn ConversationStore>> {
    match backend {
        "journal" => Ok(std::sync::Arc::new(JournalStore::new(journal_dir.into())?)),
        "memory" => Ok(std::sync::Arc::new(MemoryStore::new())),
        other => anyhow::bail!("unsupported storage backend: {other}"),
    }
}

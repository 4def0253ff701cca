// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::entry::{Entry, Metadata};
use crate::error::Result;

/// Persistent log of Entries plus Metadata for one conversation.
///
/// Implementations guarantee: after a successful `save`, a subsequent
/// `load` observes exactly the saved entries and metadata; a failed `save`
/// leaves on-disk state unchanged; reads never observe a partially written
/// conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, id: &str, entries: &[Entry], metadata: &Metadata) -> Result<()>;

    async fn load(&self, id: &str) -> Result<(Vec<Entry>, Metadata)>;

    /// Ordered by `updated_at` descending. `offset` past the end yields an
    /// empty list. `limit == 0` means no cap.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Metadata>>;

    /// Conversations needing a title: `(!title_generated || title_invalidated)
    /// && message_count >= 2`.
    async fn list_needing_titles(&self, limit: usize) -> Result<Vec<Metadata>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Rewrites metadata, preserving entries.
    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<()>;

    async fn health(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

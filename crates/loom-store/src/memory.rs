// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory ConversationStore. Authoritative only within a process
//! lifetime — useful for tests and for the `memory` storage backend tag.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::entry::{Entry, Metadata};
use crate::error::{ConversationStoreError, Result};
use crate::store::ConversationStore;

#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, (Vec<Entry>, Metadata)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save(&self, id: &str, entries: &[Entry], metadata: &Metadata) -> Result<()> {
        self.conversations.write().await.insert(id.to_string(), (entries.to_vec(), metadata.clone()));
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(Vec<Entry>, Metadata)> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ConversationStoreError::NotFound(id.to_string()))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Metadata>> {
        let conversations = self.conversations.read().await;
        let mut all: Vec<Metadata> = conversations.values().map(|(_, m)| m.clone()).collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let start = offset.min(all.len());
        let slice = if limit == 0 { &all[start..] } else { &all[start..(start + limit).min(all.len())] };
        Ok(slice.to_vec())
    }

    async fn list_needing_titles(&self, limit: usize) -> Result<Vec<Metadata>> {
        let all = self.list(0, 0).await?;
        let filtered: Vec<Metadata> = all.into_iter().filter(Metadata::needs_title).collect();
        Ok(if limit == 0 { filtered } else { filtered.into_iter().take(limit).collect() })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.conversations.write().await.remove(id);
        Ok(())
    }

    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let (entries, _) =
            conversations.get(id).cloned().ok_or_else(|| ConversationStoreError::NotFound(id.to_string()))?;
        conversations.insert(id.to_string(), (entries, metadata.clone()));
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<Entry> {
        (0..n).map(|i| Entry::user(format!("msg {i}"))).collect()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryStore::new();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(2), &meta).await.unwrap();
        let (loaded, _) = store.load("c1").await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn load_missing_returns_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.load("nope").await, Err(ConversationStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_metadata_requires_existing_conversation() {
        let store = MemoryStore::new();
        let meta = Metadata::new("c1");
        assert!(store.update_metadata("c1", &meta).await.is_err());
    }

    #[tokio::test]
    async fn delete_then_load_returns_not_found() {
        let store = MemoryStore::new();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(1), &meta).await.unwrap();
        store.delete("c1").await.unwrap();
        assert!(store.load("c1").await.is_err());
    }

    #[tokio::test]
    async fn list_respects_limit_and_offset() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut meta = Metadata::new(format!("c{i}"));
            meta.updated_at = chrono::Utc::now() - chrono::Duration::seconds(i as i64);
            store.save(&format!("c{i}"), &entries(1), &meta).await.unwrap();
        }
        let page = store.list(2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "c1");
    }
}

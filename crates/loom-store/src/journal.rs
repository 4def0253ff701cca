// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Journaled file backend: the primary ConversationStore implementation.
//!
//! Each conversation is one file, `<dir>/<id>.jsonl`. Lines are independent
//! JSON objects tagged `type`. The first physical line additionally carries
//! `v: 2`. A trailing `meta` line (the last one present) is authoritative.
//! After the initial write, subsequent saves append new entry lines plus a
//! fresh trailing meta line rather than rewriting the whole file, unless the
//! new entry list is not a superset of what's on disk, in which case the
//! file is rewritten atomically via write-to-temp + rename.
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::entry::{Entry, Metadata};
use crate::error::{ConversationStoreError, Result};
use crate::store::ConversationStore;

#[derive(Serialize)]
struct EntryLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<u8>,
    #[serde(rename = "type")]
    kind: &'static str,
    index: usize,
    entry: &'a Entry,
}

#[derive(Serialize)]
struct MetaLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<u8>,
    #[serde(rename = "type")]
    kind: &'static str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct RawLine {
    #[serde(default)]
    v: Option<u8>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    entry: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
struct LegacyLayout {
    metadata: Option<Metadata>,
    entries: Option<Vec<Entry>>,
}

/// Journaled, append-friendly ConversationStore backed by one file per
/// conversation.
pub struct JournalStore {
    dir: PathBuf,
    /// Cached on-disk entry count per conversation id, used to decide
    /// whether a save can append or must rewrite. Invalidated on delete.
    persisted_counts: RwLock<HashMap<String, usize>>,
    /// Per-id exclusive lock, lazily created. Guards save/delete; load takes
    /// the same lock in read mode (`tokio::sync::RwLock` doesn't expose a
    /// read-mode borrow through an `Arc` cheaply here, so loads take the
    /// full lock too — acceptable since file reads are fast and this is a
    /// single-process store).
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JournalStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, persisted_counts: RwLock::new(HashMap::new()), file_locks: Mutex::new(HashMap::new()) })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.file_locks.lock().await;
        locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn read_raw_lines(path: &Path) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConversationStoreError::StorageUnavailable(format!("reading {}: {e}", path.display())))?;
        Ok(text.lines().map(str::to_string).collect())
    }

    fn parse_journal(lines: &[String]) -> Result<(BTreeMap<usize, Entry>, Option<Metadata>)> {
        let mut entries = BTreeMap::new();
        let mut metadata = None;
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawLine = serde_json::from_str(line).map_err(|e| {
                ConversationStoreError::SerializationFailure(format!("line {i}: invalid JSON: {e}"))
            })?;
            match raw.kind.as_deref() {
                Some("entry") => {
                    let idx = raw.index.ok_or_else(|| {
                        ConversationStoreError::SerializationFailure(format!("line {i}: entry missing index"))
                    })?;
                    let entry_value = raw.entry.ok_or_else(|| {
                        ConversationStoreError::SerializationFailure(format!("line {i}: entry missing payload"))
                    })?;
                    let entry: Entry = serde_json::from_value(entry_value).map_err(|e| {
                        ConversationStoreError::SerializationFailure(format!("line {i}: malformed entry: {e}"))
                    })?;
                    entries.insert(idx, entry);
                }
                Some("meta") => {
                    let meta_value = raw.metadata.ok_or_else(|| {
                        ConversationStoreError::SerializationFailure(format!("line {i}: meta missing payload"))
                    })?;
                    let meta: Metadata = serde_json::from_value(meta_value).map_err(|e| {
                        ConversationStoreError::SerializationFailure(format!("line {i}: malformed metadata: {e}"))
                    })?;
                    metadata = Some(meta);
                }
                other => {
                    return Err(ConversationStoreError::SerializationFailure(format!(
                        "line {i}: unrecognised type {other:?}"
                    )))
                }
            }
        }
        Ok((entries, metadata))
    }

    fn parse_legacy(lines: &[String]) -> Result<(Vec<Entry>, Metadata)> {
        let joined = lines.join("\n");
        // Legacy layout is two top-level JSON values on their own lines;
        // parse each independently rather than as one stream.
        let mut metadata = None;
        let mut entries = None;
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LegacyLayout = serde_json::from_str(line)
                .map_err(|e| ConversationStoreError::SerializationFailure(format!("legacy line: {e}")))?;
            if let Some(m) = parsed.metadata {
                metadata = Some(m);
            }
            if let Some(e) = parsed.entries {
                entries = Some(e);
            }
        }
        let _ = joined;
        let metadata = metadata
            .ok_or_else(|| ConversationStoreError::SerializationFailure("legacy file missing metadata".into()))?;
        Ok((entries.unwrap_or_default(), metadata))
    }

    fn rewrite(path: &Path, entries: &[Entry], metadata: &Metadata) -> Result<()> {
        let tmp = path.with_extension("jsonl.tmp");
        let result = (|| -> Result<()> {
            let mut buf = String::new();
            for (i, entry) in entries.iter().enumerate() {
                let line = EntryLine { v: if i == 0 { Some(2) } else { None }, kind: "entry", index: i, entry };
                buf.push_str(&serde_json::to_string(&line).map_err(|e| {
                    ConversationStoreError::SerializationFailure(format!("serialising entry {i}: {e}"))
                })?);
                buf.push('\n');
            }
            let meta_line =
                MetaLine { v: if entries.is_empty() { Some(2) } else { None }, kind: "meta", metadata };
            buf.push_str(
                &serde_json::to_string(&meta_line)
                    .map_err(|e| ConversationStoreError::SerializationFailure(format!("serialising metadata: {e}")))?,
            );
            buf.push('\n');
            std::fs::write(&tmp, buf)
                .map_err(|e| ConversationStoreError::StorageUnavailable(format!("writing {}: {e}", tmp.display())))?;
            std::fs::rename(&tmp, path)
                .map_err(|e| ConversationStoreError::StorageUnavailable(format!("renaming {}: {e}", tmp.display())))?;
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }

    fn append(path: &Path, start_index: usize, new_entries: &[Entry], metadata: &Metadata) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| ConversationStoreError::StorageUnavailable(format!("opening {}: {e}", path.display())))?;
        let mut buf = String::new();
        for (offset, entry) in new_entries.iter().enumerate() {
            let line = EntryLine { v: None, kind: "entry", index: start_index + offset, entry };
            buf.push_str(&serde_json::to_string(&line).map_err(|e| {
                ConversationStoreError::SerializationFailure(format!("serialising appended entry: {e}"))
            })?);
            buf.push('\n');
        }
        let meta_line = MetaLine { v: None, kind: "meta", metadata };
        buf.push_str(
            &serde_json::to_string(&meta_line)
                .map_err(|e| ConversationStoreError::SerializationFailure(format!("serialising metadata: {e}")))?,
        );
        buf.push('\n');
        file.write_all(buf.as_bytes())
            .map_err(|e| ConversationStoreError::StorageUnavailable(format!("appending to {}: {e}", path.display())))?;
        Ok(())
    }

    fn load_from_disk(path: &Path) -> Result<(Vec<Entry>, Metadata)> {
        let lines = Self::read_raw_lines(path)?;
        let first_has_v2 = lines.first().map(|l| l.contains("\"v\":2")).unwrap_or(false);
        if first_has_v2 {
            let (entries, metadata) = Self::parse_journal(&lines)?;
            let metadata = metadata
                .ok_or_else(|| ConversationStoreError::SerializationFailure("journal missing meta line".into()))?;
            Ok((entries.into_values().collect(), metadata))
        } else {
            Self::parse_legacy(&lines)
        }
    }
}

#[async_trait]
impl ConversationStore for JournalStore {
    async fn save(&self, id: &str, entries: &[Entry], metadata: &Metadata) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let path = self.path_for(id);

        let cached = self.persisted_counts.read().await.get(id).copied();
        let persisted_count = match cached {
            Some(c) => Some(c),
            None if path.is_file() => {
                // First touch this process-lifetime: fall back to reading the
                // on-disk prefix once, so a correctness check is still possible.
                match Self::load_from_disk(&path) {
                    Ok((on_disk, _)) => Some(on_disk.len()),
                    Err(_) => None,
                }
            }
            None => None,
        };

        let can_append = match persisted_count {
            Some(count) if count <= entries.len() => true,
            _ => false,
        };

        if can_append && path.is_file() {
            let count = persisted_count.unwrap();
            debug!(%id, from = count, to = entries.len(), "appending to conversation journal");
            Self::append(&path, count, &entries[count..], metadata)?;
        } else {
            debug!(%id, entries = entries.len(), "rewriting conversation journal");
            Self::rewrite(&path, entries, metadata)?;
        }

        self.persisted_counts.write().await.insert(id.to_string(), entries.len());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(Vec<Entry>, Metadata)> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(ConversationStoreError::NotFound(id.to_string()));
        }
        let (entries, metadata) = Self::load_from_disk(&path)?;
        self.persisted_counts.write().await.insert(id.to_string(), entries.len());
        Ok((entries, metadata))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Metadata>> {
        let mut all = Vec::new();
        let read_dir = std::fs::read_dir(&self.dir)
            .map_err(|e| ConversationStoreError::StorageUnavailable(format!("reading {}: {e}", self.dir.display())))?;
        for entry in read_dir {
            let entry =
                entry.map_err(|e| ConversationStoreError::StorageUnavailable(format!("listing directory: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Ok((_, meta)) = Self::load_from_disk(&path) {
                all.push(meta);
            }
        }
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
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let path = self.path_for(id);
        if path.is_file() {
            std::fs::remove_file(&path)
                .map_err(|e| ConversationStoreError::StorageUnavailable(format!("deleting {}: {e}", path.display())))?;
        }
        self.persisted_counts.write().await.remove(id);
        Ok(())
    }

    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<()> {
        let (entries, _) = self.load(id).await?;
        self.save(id, &entries, metadata).await
    }

    async fn health(&self) -> Result<()> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(ConversationStoreError::StorageUnavailable(format!("{} is not a directory", self.dir.display())))
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_model::Role;

    fn store() -> (JournalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn entries(n: usize) -> Vec<Entry> {
        (0..n).map(|i| Entry::user(format!("msg {i}"))).collect()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (store, _dir) = store();
        let mut meta = Metadata::new("c1");
        meta.message_count = 2;
        store.save("c1", &entries(2), &meta).await.unwrap();
        let (loaded_entries, loaded_meta) = store.load("c1").await.unwrap();
        assert_eq!(loaded_entries.len(), 2);
        assert_eq!(loaded_meta.id, "c1");
    }

    #[tokio::test]
    async fn load_missing_conversation_returns_not_found() {
        let (store, _dir) = store();
        assert!(matches!(store.load("nope").await, Err(ConversationStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn second_save_with_more_entries_appends() {
        let (store, dir) = store();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(2), &meta).await.unwrap();
        let size_after_first = std::fs::metadata(dir.path().join("c1.jsonl")).unwrap().len();
        store.save("c1", &entries(4), &meta).await.unwrap();
        let size_after_second = std::fs::metadata(dir.path().join("c1.jsonl")).unwrap().len();
        assert!(size_after_second > size_after_first);
        let (loaded, _) = store.load("c1").await.unwrap();
        assert_eq!(loaded.len(), 4);
    }

    #[tokio::test]
    async fn save_with_fewer_entries_triggers_rewrite() {
        let (store, _dir) = store();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(4), &meta).await.unwrap();
        store.save("c1", &entries(1), &meta).await.unwrap();
        let (loaded, _) = store.load("c1").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn trailing_meta_line_wins() {
        let (store, dir) = store();
        let mut meta1 = Metadata::new("c1");
        meta1.title = "first".into();
        store.save("c1", &entries(1), &meta1).await.unwrap();
        let mut meta2 = Metadata::new("c1");
        meta2.title = "second".into();
        store.save("c1", &entries(1), &meta2).await.unwrap();
        let (_, loaded) = store.load("c1").await.unwrap();
        assert_eq!(loaded.title, "second");
        let _ = dir;
    }

    #[tokio::test]
    async fn first_line_carries_v2_marker() {
        let (store, dir) = store();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(1), &meta).await.unwrap();
        let text = std::fs::read_to_string(dir.path().join("c1.jsonl")).unwrap();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.contains("\"v\":2"));
    }

    #[tokio::test]
    async fn malformed_line_fails_whole_load() {
        let (store, dir) = store();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(1), &meta).await.unwrap();
        let path = dir.path().join("c1.jsonl");
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("not json at all\n");
        std::fs::write(&path, text).unwrap();
        assert!(matches!(store.load("c1").await, Err(ConversationStoreError::SerializationFailure(_))));
    }

    #[tokio::test]
    async fn legacy_layout_without_v2_marker_is_readable() {
        let (store, dir) = store();
        let path = dir.path().join("legacy.jsonl");
        let meta = Metadata::new("legacy");
        let legacy = format!(
            "{{\"metadata\":{}}}\n{{\"entries\":{}}}\n",
            serde_json::to_string(&meta).unwrap(),
            serde_json::to_string(&entries(2)).unwrap()
        );
        std::fs::write(&path, legacy).unwrap();
        let (loaded_entries, loaded_meta) = store.load("legacy").await.unwrap();
        assert_eq!(loaded_entries.len(), 2);
        assert_eq!(loaded_meta.id, "legacy");
    }

    #[tokio::test]
    async fn delete_removes_file_and_cache() {
        let (store, dir) = store();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(1), &meta).await.unwrap();
        store.delete("c1").await.unwrap();
        assert!(!dir.path().join("c1.jsonl").is_file());
        assert!(store.persisted_counts.read().await.get("c1").is_none());
    }

    #[tokio::test]
    async fn update_metadata_preserves_entries() {
        let (store, _dir) = store();
        let meta = Metadata::new("c1");
        store.save("c1", &entries(3), &meta).await.unwrap();
        let mut updated = meta.clone();
        updated.title = "renamed".into();
        store.update_metadata("c1", &updated).await.unwrap();
        let (loaded_entries, loaded_meta) = store.load("c1").await.unwrap();
        assert_eq!(loaded_entries.len(), 3);
        assert_eq!(loaded_meta.title, "renamed");
    }

    #[tokio::test]
    async fn list_orders_by_updated_at_descending() {
        let (store, _dir) = store();
        let mut older = Metadata::new("old");
        older.updated_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let newer = Metadata::new("new");
        store.save("old", &entries(1), &older).await.unwrap();
        store.save("new", &entries(1), &newer).await.unwrap();
        let list = store.list(0, 0).await.unwrap();
        assert_eq!(list[0].id, "new");
        assert_eq!(list[1].id, "old");
    }

    #[tokio::test]
    async fn list_needing_titles_filters_correctly() {
        let (store, _dir) = store();
        let mut needs = Metadata::new("needs");
        needs.message_count = 2;
        let mut done = Metadata::new("done");
        done.message_count = 2;
        done.title_generated = true;
        store.save("needs", &entries(2), &needs).await.unwrap();
        store.save("done", &entries(2), &done).await.unwrap();
        let results = store.list_needing_titles(0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "needs");
    }

    #[tokio::test]
    async fn health_reports_ok_when_directory_exists() {
        let (store, _dir) = store();
        assert!(store.health().await.is_ok());
    }

    #[test]
    fn entry_role_round_trips() {
        let e = Entry::user("hi");
        assert_eq!(e.role, Role::User);
    }
}

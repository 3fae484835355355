/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Activities persisted as one JSON file each under date-partitioned
//! directories, an in-memory index that is the only route from id to file,
//! and a read cache for every JSON document the node keeps on disk.

mod cache;
mod index;

pub use cache::{CacheSettings, DocCache};
pub use index::{author_of, published_ms, EntryKind, Index, IndexEntry};

use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const LOCAL_ROOT: &str = "posts";
const REMOTE_ROOT: &str = "activitystream";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not indexed: {0}")]
    NotIndexed(String),
    #[error("fetch previously failed: {0}")]
    FetchFailed(String),
    #[error("document has no id")]
    MissingId,
    #[error("remote copy would replace local post {0}")]
    LocalPost(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct Store {
    root: PathBuf,
    local_root: PathBuf,
    remote_root: PathBuf,
    index: RwLock<Index>,
    cache: DocCache,
    write_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Store {
    pub fn open(root: impl AsRef<Path>, cache: CacheSettings) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let local_root = root.join(LOCAL_ROOT);
        let remote_root = root.join(REMOTE_ROOT);
        for dir in [&root, &local_root, &remote_root] {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(Self {
            root,
            local_root,
            remote_root,
            index: RwLock::new(Index::default()),
            cache: DocCache::new(cache),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named document at the data root (`followers.json`, ...).
    pub fn doc_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// `<root>/<YYYY>/<MM-DD>/<sha256(id)>.json`, root chosen by locality.
    pub fn compute_path(&self, id: &str, published: i64, is_local: bool) -> PathBuf {
        let root = if is_local { &self.local_root } else { &self.remote_root };
        root.join(date_folder(published)).join(format!("{}.json", hash_id(id)))
    }

    fn path_for(&self, entry: &IndexEntry) -> Result<PathBuf, StoreError> {
        match entry.kind {
            EntryKind::Fail => Err(StoreError::FetchFailed(entry.id.clone())),
            kind => Ok(self.compute_path(&entry.id, entry.published, kind == EntryKind::Note)),
        }
    }

    /// Path of the likes/boosts record kept next to an indexed post.
    pub fn likes_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let entry = self.entry(id).ok_or_else(|| StoreError::NotIndexed(id.to_string()))?;
        let path = self.path_for(&entry)?;
        Ok(path.with_file_name(format!("{}.likes.json", hash_id(id))))
    }

    pub fn entry(&self, id: &str) -> Option<IndexEntry> {
        self.read_index().get(id).cloned()
    }

    pub fn is_indexed(&self, id: &str) -> bool {
        self.read_index().contains(id)
    }

    pub fn index_len(&self) -> usize {
        self.read_index().len()
    }

    pub fn reply_count(&self, id: &str) -> usize {
        self.read_index().reply_count(id)
    }

    pub fn replies_to(&self, id: &str) -> Vec<IndexEntry> {
        self.read_index().replies_to(id)
    }

    /// Non-failed, dated entries, newest first.
    pub fn entries_sorted(&self) -> Vec<IndexEntry> {
        self.read_index().sorted_desc()
    }

    /// Writes `doc` to its computed path and indexes it. An existing entry for
    /// the same id is replaced with the new metadata, except that a remote
    /// document never replaces a local post.
    pub async fn persist(&self, doc: &Value, is_local: bool) -> Result<IndexEntry, StoreError> {
        let kind = if is_local { EntryKind::Note } else { EntryKind::Activity };
        let entry = IndexEntry::from_document(doc, kind).ok_or(StoreError::MissingId)?;
        let previous = self.entry(&entry.id);
        if !is_local && previous.as_ref().is_some_and(|p| p.kind == EntryKind::Note) {
            return Err(StoreError::LocalPost(entry.id));
        }
        let path = self.compute_path(&entry.id, entry.published, is_local);
        self.write_doc(&path, doc).await?;

        if let Some(prev) = previous.filter(|p| p.kind != EntryKind::Fail) {
            if let Ok(old_path) = self.path_for(&prev) {
                if old_path != path {
                    self.move_likes(&entry.id, &old_path, &path).await?;
                    self.remove_file(&old_path).await?;
                }
            }
        }
        self.write_index().upsert(entry.clone());
        debug!("persisted {} -> {}", entry.id, path.display());
        Ok(entry)
    }

    pub async fn read(&self, id: &str) -> Result<Value, StoreError> {
        let entry = self.entry(id).ok_or_else(|| StoreError::NotIndexed(id.to_string()))?;
        let path = self.path_for(&entry)?;
        self.read_doc(&path)
            .await?
            .ok_or_else(|| StoreError::io(&path, std::io::Error::from(ErrorKind::NotFound)))
    }

    /// Drops the index entry only; the file stays until [`Store::delete_file`].
    pub fn remove_from_index(&self, id: &str) -> Option<IndexEntry> {
        self.write_index().remove(id)
    }

    /// Deletes the file (and likes record) of an indexed activity.
    pub async fn delete_file(&self, id: &str) -> Result<(), StoreError> {
        let entry = self.entry(id).ok_or_else(|| StoreError::NotIndexed(id.to_string()))?;
        if entry.kind == EntryKind::Fail {
            return Ok(());
        }
        let path = self.path_for(&entry)?;
        self.remove_file(&path).await?;
        self.remove_file(&path.with_file_name(format!("{}.likes.json", hash_id(id))))
            .await
    }

    /// Records that `id` could not be fetched so it is not retried on every read.
    pub fn mark_failed(&self, id: &str) -> bool {
        self.write_index().add(IndexEntry::failed(id))
    }

    /// Scans both roots and indexes every parsable file. Returns the number of entries added.
    pub async fn build_index(&self) -> Result<usize> {
        let mut added = 0usize;
        for (root, kind) in [
            (self.local_root.clone(), EntryKind::Note),
            (self.remote_root.clone(), EntryKind::Activity),
        ] {
            for path in list_json_files(&root).await? {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("index: skip unreadable {}: {e}", path.display());
                        continue;
                    }
                };
                let doc: Value = match serde_json::from_slice(&bytes) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("index: skip malformed {}: {e}", path.display());
                        continue;
                    }
                };
                let Some(entry) = IndexEntry::from_document(&doc, kind) else {
                    warn!("index: skip {} without id", path.display());
                    continue;
                };
                if self.write_index().add(entry) {
                    added += 1;
                }
            }
        }
        info!("index built: {added} entries");
        Ok(added)
    }

    /// Reads a JSON document through the cache. `Ok(None)` when the file does not exist.
    pub async fn read_doc(&self, path: &Path) -> Result<Option<Value>, StoreError> {
        if let Some(v) = self.cache.get(path) {
            return Ok(Some(v));
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let v: Value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        self.cache.put(path, v.clone());
        Ok(Some(v))
    }

    /// Atomically replaces a JSON document (write temp file, then rename).
    /// Writers to the same path are serialized.
    pub async fn write_doc(&self, path: &Path, doc: &Value) -> Result<(), StoreError> {
        let lock = self.path_lock(path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        self.cache.put(path, doc.clone());
        drop(_guard);
        self.prune_locks();
        Ok(())
    }

    /// The likes record lives next to its post and follows it to a new directory.
    async fn move_likes(&self, id: &str, from: &Path, to: &Path) -> Result<(), StoreError> {
        let name = format!("{}.likes.json", hash_id(id));
        let (from, to) = (from.with_file_name(&name), to.with_file_name(&name));
        let lock = self.path_lock(&from);
        let _guard = lock.lock().await;
        self.cache.invalidate(&from);
        self.cache.invalidate(&to);
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&from, e)),
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<(), StoreError> {
        self.cache.invalidate(path);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    pub fn start_cache_sweeper(self: &Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every.max(Duration::from_secs(1)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() { break; }
                    }
                    _ = tick.tick() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                let evicted = store.sweep_cache();
                if evicted > 0 {
                    debug!("cache sweep evicted {evicted}");
                }
            }
        });
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    fn prune_locks(&self) {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.len() > 256 {
            locks.retain(|_, l| Arc::strong_count(l) > 1);
        }
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn hash_id(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// `YYYY/MM-DD` (UTC) of an epoch-millis timestamp.
fn date_folder(published: i64) -> PathBuf {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(published as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    PathBuf::from(format!("{:04}", dt.year())).join(format!("{:02}-{:02}", u8::from(dt.month()), dt.day()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn list_json_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut rd = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(StoreError::io(&dir, e).into()),
        };
        while let Some(item) = rd.next_entry().await.map_err(|e| StoreError::io(&dir, e))? {
            let path = item.path();
            let ft = item.file_type().await.map_err(|e| StoreError::io(&path, e))?;
            if ft.is_dir() {
                stack.push(path);
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".json") && !name.ends_with(".likes.json") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

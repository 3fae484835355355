/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde_json::Value;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Entries older than this are reloaded from disk on the next read.
    pub max_age: Duration,
    /// Entries not read for this long are dropped by [`DocCache::sweep`].
    pub min_age: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            min_age: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    contents: Value,
    write_time: Instant,
    last_access: Instant,
}

/// Read-through cache for JSON documents keyed by file path.
#[derive(Debug)]
pub struct DocCache {
    settings: CacheSettings,
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl DocCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Value> {
        self.get_at(path, Instant::now())
    }

    pub fn get_at(&self, path: &Path, now: Instant) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get_mut(path)?;
        if now.saturating_duration_since(entry.write_time) >= self.settings.max_age {
            entries.remove(path);
            return None;
        }
        entry.last_access = now;
        Some(entry.contents.clone())
    }

    pub fn put(&self, path: &Path, contents: Value) {
        self.put_at(path, contents, Instant::now());
    }

    pub fn put_at(&self, path: &Path, contents: Value, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                contents,
                write_time: now,
                last_access: now,
            },
        );
    }

    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(path);
    }

    /// Evicts idle entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let min_age = self.settings.min_age;
        entries.retain(|_, e| now.saturating_duration_since(e.last_access) < min_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

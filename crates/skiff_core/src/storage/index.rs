/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Ingested from a remote node.
    Activity,
    /// Authored by the local account.
    Note,
    /// A remote object that could not be fetched; has no file.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub id: String,
    pub actor: Option<String>,
    /// Epoch millis; 0 when the document carries no valid `published`.
    pub published: i64,
    #[serde(rename = "inReplyTo")]
    pub in_reply_to: Option<String>,
}

impl IndexEntry {
    pub fn from_document(doc: &Value, kind: EntryKind) -> Option<Self> {
        let id = doc.get("id").and_then(Value::as_str)?.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            id: id.to_string(),
            actor: author_of(doc),
            published: published_ms(doc),
            in_reply_to: doc
                .get("inReplyTo")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    pub fn failed(id: &str) -> Self {
        Self {
            kind: EntryKind::Fail,
            id: id.to_string(),
            actor: None,
            published: 0,
            in_reply_to: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind == EntryKind::Note
    }

    /// Eligible for feeds: not failed and carrying a usable timestamp.
    pub fn is_listable(&self) -> bool {
        self.kind != EntryKind::Fail && self.published > 0
    }
}

/// `attributedTo` for objects, `actor` for activities.
pub fn author_of(doc: &Value) -> Option<String> {
    let field = doc.get("attributedTo").or_else(|| doc.get("actor"))?;
    let id = match field {
        Value::String(s) => Some(s.as_str()),
        Value::Object(o) => o.get("id").and_then(Value::as_str),
        Value::Array(arr) => arr.iter().find_map(|v| match v {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("id").and_then(Value::as_str),
            _ => None,
        }),
        _ => None,
    }?;
    Some(id.to_string())
}

pub fn published_ms(doc: &Value) -> i64 {
    doc.get("published")
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s.trim(), &Rfc3339).ok())
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64)
        .filter(|ms| *ms > 0)
        .unwrap_or(0)
}

/// In-memory metadata for every known activity, keyed by id, with a
/// reverse map from parent id to the ids replying to it.
#[derive(Debug, Default)]
pub struct Index {
    by_id: HashMap<String, IndexEntry>,
    replies: HashMap<String, Vec<String>>,
}

impl Index {
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Adds an entry unless its id is already present. Returns whether it was added.
    pub fn add(&mut self, entry: IndexEntry) -> bool {
        if self.by_id.contains_key(&entry.id) {
            return false;
        }
        self.link_reply(&entry);
        self.by_id.insert(entry.id.clone(), entry);
        true
    }

    /// Inserts or replaces, returning the previous entry.
    pub fn upsert(&mut self, entry: IndexEntry) -> Option<IndexEntry> {
        let previous = self.remove(&entry.id);
        self.link_reply(&entry);
        self.by_id.insert(entry.id.clone(), entry);
        previous
    }

    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        let entry = self.by_id.remove(id)?;
        if let Some(parent) = entry.in_reply_to.as_deref() {
            if let Some(children) = self.replies.get_mut(parent) {
                children.retain(|c| c != id);
                if children.is_empty() {
                    self.replies.remove(parent);
                }
            }
        }
        Some(entry)
    }

    pub fn reply_count(&self, id: &str) -> usize {
        self.replies.get(id).map(Vec::len).unwrap_or(0)
    }

    pub fn replies_to(&self, id: &str) -> Vec<IndexEntry> {
        self.replies
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| self.by_id.get(c).cloned()).collect())
            .unwrap_or_default()
    }

    /// Listable entries, newest first. Ties break on id for a stable order.
    pub fn sorted_desc(&self) -> Vec<IndexEntry> {
        let mut out: Vec<IndexEntry> = self
            .by_id
            .values()
            .filter(|e| e.is_listable())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.id.cmp(&b.id)));
        out
    }

    fn link_reply(&mut self, entry: &IndexEntry) {
        if let Some(parent) = entry.in_reply_to.as_deref() {
            self.replies
                .entry(parent.to_string())
                .or_default()
                .push(entry.id.clone());
        }
    }
}

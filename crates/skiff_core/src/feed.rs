/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::federation::object_id;
use crate::state::CoreState;
use crate::storage::{author_of, published_ms, EntryKind, IndexEntry};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use skiff_protocol::Notification;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    pub entry: IndexEntry,
    /// The post to render; for a boost, the boosted post.
    pub note: Value,
    pub author: Option<String>,
    pub liked: bool,
    pub boosted: bool,
    #[serde(rename = "replyCount")]
    pub reply_count: usize,
    #[serde(rename = "boostedBy", skip_serializing_if = "Option::is_none")]
    pub boosted_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Where the next page starts; `None` once the index is exhausted.
    #[serde(rename = "nextOffset")]
    pub next_offset: Option<usize>,
}

/// Newest-first page of local posts and posts from followed actors.
///
/// Replies from followed actors are kept only when they answer one of our own
/// posts or a post by someone we also follow.
pub async fn build_feed(state: &CoreState, limit: usize, offset: usize) -> Result<FeedPage> {
    let following: HashSet<String> = state.social.following().await?.into_iter().collect();
    let entries = state.store.entries_sorted();

    let mut items = Vec::new();
    let mut pos = offset;
    while pos < entries.len() && items.len() < limit {
        let entry = &entries[pos];
        pos += 1;
        if !is_visible(state, &following, entry).await {
            continue;
        }
        if let Some(item) = load_item(state, entry).await? {
            items.push(item);
        }
    }

    Ok(FeedPage {
        items,
        next_offset: (pos < entries.len()).then_some(pos),
    })
}

async fn is_visible(state: &CoreState, following: &HashSet<String>, entry: &IndexEntry) -> bool {
    if entry.is_local() {
        return true;
    }
    let Some(actor) = entry.actor.as_deref() else {
        return false;
    };
    if !following.contains(actor) {
        return false;
    }
    let Some(parent) = entry.in_reply_to.as_deref() else {
        return true;
    };
    if state.account.owns(parent) {
        return true;
    }
    let parent_author = match state.store.entry(parent) {
        Some(e) if e.kind != EntryKind::Fail => e.actor,
        Some(_) => None,
        None => match state.federation.fetch_object(&state.account, parent).await {
            Ok(doc) => author_of(&doc),
            Err(e) => {
                debug!("parent of {} unavailable: {e}", entry.id);
                None
            }
        },
    };
    parent_author.is_some_and(|a| following.contains(&a))
}

async fn load_item(state: &CoreState, entry: &IndexEntry) -> Result<Option<FeedItem>> {
    let doc = match state.store.read(&entry.id).await {
        Ok(d) => d,
        Err(e) => {
            debug!("feed: skip {}: {e}", entry.id);
            return Ok(None);
        }
    };

    let (note, boosted_by) = if doc.get("type").and_then(Value::as_str) == Some("Announce") {
        let Some(target) = doc.get("object").and_then(object_id) else {
            return Ok(None);
        };
        match state.federation.fetch_object(&state.account, target).await {
            Ok(note) => (note, entry.actor.clone()),
            Err(e) => {
                debug!("feed: boosted {target} unavailable: {e}");
                return Ok(None);
            }
        }
    } else {
        (doc, None)
    };

    let post_id = note
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(entry.id.as_str())
        .to_string();
    let liked = match state.social.own_like(&post_id).await {
        Ok(like) => like.is_some(),
        Err(e) => {
            warn!("feed: own likes unreadable: {e:#}");
            false
        }
    };
    let boosted = match state.social.own_boost(&post_id).await {
        Ok(boost) => boost.is_some(),
        Err(e) => {
            warn!("feed: own boosts unreadable: {e:#}");
            false
        }
    };
    Ok(Some(FeedItem {
        entry: entry.clone(),
        author: author_of(&note),
        liked,
        boosted,
        reply_count: state.store.reply_count(&post_id),
        boosted_by,
        note,
    }))
}

fn in_reply_to(doc: &Value) -> Option<String> {
    doc.get("inReplyTo").and_then(object_id).map(str::to_string)
}

/// The post `id` with its ancestors and all known descendants, oldest first.
/// A missing ancestor ends the upward walk without failing the unroll.
pub async fn unroll_thread(state: &CoreState, id: &str) -> Result<Vec<Value>> {
    let root = state.federation.fetch_object(&state.account, id).await?;
    let mut seen: HashSet<String> = HashSet::from([id.to_string()]);
    let mut out = vec![root.clone()];

    let mut parent = in_reply_to(&root);
    while let Some(p) = parent.take() {
        if !seen.insert(p.clone()) {
            break;
        }
        match state.federation.fetch_object(&state.account, &p).await {
            Ok(doc) => {
                parent = in_reply_to(&doc);
                out.push(doc);
            }
            Err(e) => {
                debug!("thread of {id}: ancestor {p} unavailable: {e}");
            }
        }
    }

    let mut pending = vec![id.to_string()];
    while let Some(current) = pending.pop() {
        for child in state.store.replies_to(&current) {
            if !seen.insert(child.id.clone()) {
                continue;
            }
            match state.store.read(&child.id).await {
                Ok(doc) => {
                    out.push(doc);
                    pending.push(child.id);
                }
                Err(e) => debug!("thread of {id}: reply {} unreadable: {e}", child.id),
            }
        }
    }

    out.sort_by_key(published_ms);
    Ok(out)
}

pub async fn notifications(state: &CoreState, limit: usize) -> Result<Vec<Notification>> {
    state.social.notifications(limit).await
}

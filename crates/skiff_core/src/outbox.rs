/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::federation::{
    build_announce, build_create, build_follow, build_like, build_undo_announce, build_undo_follow,
    build_undo_like, build_update, now_rfc3339, object_id,
};
use crate::state::CoreState;
use crate::storage::author_of;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use skiff_protocol::{ActivityType, AS_PUBLIC};
use tracing::{debug, info, warn};

/// Outbox items persisted from a newly followed actor.
const BACKFILL_LIMIT: usize = 20;

async fn author_for(state: &CoreState, post_id: &str) -> Option<String> {
    if let Some(actor) = state.store.entry(post_id).and_then(|e| e.actor) {
        return Some(actor);
    }
    match state.federation.fetch_object(&state.account, post_id).await {
        Ok(doc) => author_of(&doc),
        Err(e) => {
            debug!("author lookup for {post_id}: {e}");
            None
        }
    }
}

/// Publishes a public note (or a reply) to followers. The note is stored locally before delivery is queued.
pub async fn publish_note(state: &CoreState, content: &str, in_reply_to: Option<&str>) -> Result<Value> {
    let account = &state.account;
    let parent_author = match in_reply_to {
        Some(parent) => author_for(state, parent).await,
        None => None,
    };

    let mut cc = vec![account.followers_uri()];
    if let Some(a) = parent_author.as_deref().filter(|a| !account.is_self(a)) {
        cc.push(a.to_string());
    }
    let mut note = json!({
        "@context": skiff_protocol::AS_CONTEXT,
        "id": account.new_child_id(ActivityType::Note),
        "type": "Note",
        "attributedTo": account.id(),
        "content": content,
        "published": now_rfc3339(),
        "to": [AS_PUBLIC],
        "cc": cc,
    });
    if let Some(parent) = in_reply_to {
        note["inReplyTo"] = json!(parent);
    }

    state.store.persist(&note, true).await.context("store note")?;
    let create = build_create(account, &note);
    let mut recipients = vec![account.followers_uri()];
    recipients.extend(parent_author);
    state.federation.send(account, create, recipients);
    info!("published {}", note["id"].as_str().unwrap_or_default());
    Ok(note)
}

/// Resolves `handle`, sends a Follow and backfills recent posts from the actor's outbox.
/// The actor joins the following set once the remote accepts.
pub async fn follow(state: &CoreState, handle: &str) -> Result<String> {
    let account = &state.account;
    let actor = state.federation.resolve_handle(account, handle).await?;
    if account.is_self(&actor.id) {
        anyhow::bail!("cannot follow self");
    }
    state
        .federation
        .send(account, build_follow(account, &actor.id), vec![actor.id.clone()]);

    let page = state.federation.fetch_outbox(account, &actor).await;
    let mut stored = 0usize;
    for item in page.items.iter().take(BACKFILL_LIMIT) {
        let object = match item.get("type").and_then(Value::as_str) {
            Some("Create") => item.get("object"),
            _ => None,
        };
        let Some(object) = object.filter(|o| o.is_object()) else {
            continue;
        };
        let Some(id) = object_id(object) else { continue };
        if state.store.is_indexed(id) {
            continue;
        }
        match state.store.persist(object, false).await {
            Ok(_) => stored += 1,
            Err(e) => warn!("backfill {id}: {e}"),
        }
    }
    info!("follow sent to {} ({stored} posts backfilled)", actor.id);
    Ok(actor.id)
}

pub async fn unfollow(state: &CoreState, actor_id: &str) -> Result<()> {
    let account = &state.account;
    state.social.remove_following(actor_id).await?;
    state
        .federation
        .send(account, build_undo_follow(account, actor_id), vec![actor_id.to_string()]);
    Ok(())
}

/// Likes `post_id`, returning the Like's id. Liking twice reuses the first Like.
pub async fn like(state: &CoreState, post_id: &str) -> Result<String> {
    if let Some(existing) = state.social.own_like(post_id).await? {
        return Ok(existing);
    }
    let account = &state.account;
    let author = author_for(state, post_id).await;
    let like = build_like(account, post_id, author.as_deref());
    let like_id = like["id"].as_str().unwrap_or_default().to_string();
    state.social.record_own_like(post_id, &like_id).await?;
    if let Some(author) = author.filter(|a| !account.is_self(a)) {
        state.federation.send(account, like, vec![author]);
    }
    Ok(like_id)
}

pub async fn unlike(state: &CoreState, post_id: &str) -> Result<bool> {
    let Some(like_id) = state.social.forget_own_like(post_id).await? else {
        return Ok(false);
    };
    let account = &state.account;
    let author = author_for(state, post_id).await;
    let undo = build_undo_like(account, &like_id, post_id, author.as_deref());
    if let Some(author) = author.filter(|a| !account.is_self(a)) {
        state.federation.send(account, undo, vec![author]);
    }
    Ok(true)
}

/// Announces `post_id` to every follower and the post's author.
pub async fn boost(state: &CoreState, post_id: &str) -> Result<String> {
    if let Some(existing) = state.social.own_boost(post_id).await? {
        return Ok(existing);
    }
    let account = &state.account;
    let author = author_for(state, post_id).await;
    let announce = build_announce(account, post_id, author.as_deref());
    let announce_id = announce["id"].as_str().unwrap_or_default().to_string();
    state.social.record_own_boost(post_id, &announce_id).await?;
    let mut recipients = vec![account.followers_uri()];
    recipients.extend(author);
    state.federation.send(account, announce, recipients);
    Ok(announce_id)
}

pub async fn unboost(state: &CoreState, post_id: &str) -> Result<bool> {
    let Some(announce_id) = state.social.forget_own_boost(post_id).await? else {
        return Ok(false);
    };
    let account = &state.account;
    let author = author_for(state, post_id).await;
    let undo = build_undo_announce(account, &announce_id, post_id, author.as_deref());
    let mut recipients = vec![account.followers_uri()];
    recipients.extend(author);
    state.federation.send(account, undo, recipients);
    Ok(true)
}

/// Sends the current actor document to followers.
pub fn send_profile_update(state: &CoreState) -> Result<()> {
    let account = &state.account;
    let actor = serde_json::to_value(&account.actor)?;
    state
        .federation
        .send(account, build_update(account, actor), vec![account.followers_uri()]);
    Ok(())
}

/// A note addressed only to `to`; kept in the conversation log, not the public index.
pub async fn send_direct_message(state: &CoreState, to: &str, content: &str) -> Result<Value> {
    let account = &state.account;
    let note = json!({
        "@context": skiff_protocol::AS_CONTEXT,
        "id": account.new_child_id(ActivityType::Note),
        "type": "Note",
        "attributedTo": account.id(),
        "content": content,
        "published": now_rfc3339(),
        "to": [to],
        "directMessage": true,
        "tag": [{ "type": "Mention", "href": to }],
    });
    state.social.append_dm(to, &note, false).await?;
    state
        .federation
        .send(account, build_create(account, &note), vec![to.to_string()]);
    Ok(note)
}

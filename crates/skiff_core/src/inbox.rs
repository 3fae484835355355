/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::federation::{addressees, build_accept, normalize_actor_id, object_id};
use crate::http_sig::{key_owner, parse_signature_header, verify_date, verify_digest, verify_request};
use crate::state::CoreState;
use crate::storage::{author_of, EntryKind};
use anyhow::Result;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::Value;
use skiff_protocol::Actor;
use tracing::{debug, info, warn};

const ACTOR_TYPES: [&str; 5] = ["Person", "Service", "Application", "Group", "Organization"];

/// Shape of an inbound activity, keyed by its type and, for wrappers, the inner object's type.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Follow { target: Option<String> },
    UndoFollow,
    UndoLike { object: String },
    UndoAnnounce { announce: Option<String>, object: String },
    /// `follower` is the actor of the accepted Follow, when it was embedded.
    AcceptFollow { follower: Option<String> },
    RejectFollow { follower: Option<String> },
    Like { object: String },
    Announce { object: String },
    Create { object: Value },
    Update { object: Value },
    Delete { object: String },
    Ignored { ty: String },
}

fn type_of(v: &Value) -> &str {
    v.get("type").and_then(Value::as_str).unwrap_or("")
}

fn inner_ref(v: &Value, field: &str) -> Option<String> {
    v.get(field).and_then(object_id).map(str::to_string)
}

pub fn classify(activity: &Value) -> Inbound {
    let ty = type_of(activity);
    let object = activity.get("object").cloned().unwrap_or(Value::Null);
    let object_ref = object_id(&object).map(str::to_string);

    let ignored = || Inbound::Ignored { ty: ty.to_string() };
    match ty {
        "Follow" => Inbound::Follow { target: object_ref },
        "Undo" => match (type_of(&object), inner_ref(&object, "object")) {
            ("Follow", _) => Inbound::UndoFollow,
            ("Like", Some(target)) => Inbound::UndoLike { object: target },
            ("Announce", Some(target)) => Inbound::UndoAnnounce {
                announce: object_ref,
                object: target,
            },
            _ => ignored(),
        },
        "Accept" | "Reject" => {
            let follower = match &object {
                Value::String(_) => None,
                Value::Object(_) if type_of(&object) == "Follow" => inner_ref(&object, "actor"),
                _ => return ignored(),
            };
            if ty == "Accept" {
                Inbound::AcceptFollow { follower }
            } else {
                Inbound::RejectFollow { follower }
            }
        }
        "Like" => match object_ref {
            Some(object) => Inbound::Like { object },
            None => ignored(),
        },
        "Announce" => match object_ref {
            Some(object) => Inbound::Announce { object },
            None => ignored(),
        },
        "Create" if object_ref.is_some() => Inbound::Create { object },
        "Update" if object.is_object() => Inbound::Update { object },
        "Delete" => match object_ref {
            Some(object) => Inbound::Delete { object },
            None => ignored(),
        },
        _ => ignored(),
    }
}

/// Verifies and applies one inbound POST. 403 when the request cannot be
/// attributed to an unblocked actor, 400 for a malformed body, otherwise 200
/// even if applying the activity fails.
pub async fn handle_inbox(state: &CoreState, method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> StatusCode {
    if headers.get("digest").is_none() {
        debug!("inbox: missing Digest");
        return StatusCode::FORBIDDEN;
    }
    if let Err(e) = verify_digest(headers, body) {
        debug!("inbox: {e:#}");
        return StatusCode::FORBIDDEN;
    }
    let activity: Value = match serde_json::from_slice(body) {
        Ok(v @ Value::Object(_)) => v,
        _ => return StatusCode::BAD_REQUEST,
    };
    let Some(actor_id) = activity.get("actor").and_then(object_id).map(str::to_string) else {
        return StatusCode::BAD_REQUEST;
    };

    if is_blocked(state, &actor_id).await {
        info!("inbox: rejected blocked actor {actor_id}");
        return StatusCode::FORBIDDEN;
    }
    if let Err(e) = verify_date(headers, state.cfg.max_date_skew()) {
        debug!("inbox: {e:#}");
        return StatusCode::FORBIDDEN;
    }
    let Some(params) = headers
        .get("signature")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_signature_header(v).ok())
    else {
        debug!("inbox: missing or malformed Signature");
        return StatusCode::FORBIDDEN;
    };
    if key_owner(&params.key_id) != normalize_actor_id(&actor_id) {
        debug!("inbox: key {} does not belong to {actor_id}", params.key_id);
        return StatusCode::FORBIDDEN;
    }
    if !params.headers.iter().any(|h| h == "digest") {
        debug!("inbox: signature does not cover digest");
        return StatusCode::FORBIDDEN;
    }

    if !verify_sender(state, &actor_id, method, uri, headers).await {
        return StatusCode::FORBIDDEN;
    }

    if let Err(e) = dispatch(state, &actor_id, &activity).await {
        warn!("inbox: {} from {actor_id} not applied: {e:#}", type_of(&activity));
    }
    StatusCode::OK
}

/// Checks the signature with the cached key, refetching the actor once in case the key rotated.
async fn verify_sender(state: &CoreState, actor_id: &str, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
    let cached = state
        .federation
        .fetch_actor_cached(&state.account, actor_id)
        .await
        .ok();
    if verify_request(cached.as_ref(), method, uri, headers) {
        return true;
    }
    if cached.is_none() {
        debug!("inbox: actor {actor_id} could not be resolved");
        return false;
    }
    match state.federation.fetch_actor(&state.account, actor_id).await {
        Ok(fresh) if Some(&fresh) != cached.as_ref() => {
            let ok = verify_request(Some(&fresh), method, uri, headers);
            if ok {
                if let Err(e) = state.federation.cache_actor(&fresh).await {
                    warn!("actor cache write failed: {e:#}");
                }
            }
            ok
        }
        _ => false,
    }
}

/// Blocked by config (actor id or domain pattern) or by the persisted block list.
pub async fn is_blocked(state: &CoreState, actor_id: &str) -> bool {
    let actor_id = normalize_actor_id(actor_id);
    let host = host_of(actor_id);
    let matches = |entry: &str| {
        if entry.contains("://") {
            entry == actor_id
        } else {
            host.as_deref().map(|h| domain_matches(h, entry)).unwrap_or(false)
        }
    };
    if state.cfg.blocked_actors.iter().any(|a| a == actor_id)
        || state.cfg.blocked_domains.iter().any(|d| matches(d.as_str()))
    {
        return true;
    }
    match state.social.blocks().await {
        Ok(list) => list.iter().any(|b| matches(b.as_str())),
        Err(e) => {
            warn!("load block list: {e:#}");
            false
        }
    }
}

/// Remote objects must live on the sender's host and never carry one of our ids.
fn may_store(state: &CoreState, actor_id: &str, id: &str) -> bool {
    if state.account.owns(id) {
        return false;
    }
    match (host_of(id), host_of(actor_id)) {
        (Some(object_host), Some(actor_host)) => object_host == actor_host,
        _ => false,
    }
}

fn host_of(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    uri.host().map(|h| h.to_ascii_lowercase())
}

/// `example.com` matches exactly; `*.example.com` and `.example.com` also match subdomains.
fn domain_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    let p = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
    if p.is_empty() {
        return false;
    }
    if let Some(suffix) = p.strip_prefix("*.").or_else(|| p.strip_prefix('.')) {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    host == p
}

/// Applies a verified activity from `actor_id` to local state.
pub async fn dispatch(state: &CoreState, actor_id: &str, activity: &Value) -> Result<()> {
    let account = &state.account;
    let social = &state.social;
    let store = &state.store;

    match classify(activity) {
        Inbound::Follow { target } => {
            if target.as_deref() != Some(account.id()) {
                debug!("follow for someone else from {actor_id}");
                return Ok(());
            }
            if social.add_follower(actor_id).await? {
                social.notify("Follow", actor_id, None).await?;
                info!("new follower {actor_id}");
            }
            // Re-accept redeliveries: the remote may have missed the first Accept.
            let accept = build_accept(account, activity);
            state.federation.send(account, accept, vec![actor_id.to_string()]);
        }
        Inbound::UndoFollow => {
            if social.remove_follower(actor_id).await? {
                info!("lost follower {actor_id}");
            }
        }
        Inbound::UndoLike { object } => {
            if store.is_indexed(&object) {
                social.remove_like(&object, actor_id).await?;
            }
        }
        Inbound::UndoAnnounce { announce, object } => {
            if account.owns(&object) {
                if store.is_indexed(&object) {
                    social.remove_boost(&object, actor_id).await?;
                }
            } else if let Some(announce) = announce {
                remove_if_authored(state, &announce, actor_id).await?;
            }
        }
        Inbound::AcceptFollow { follower } => {
            if follower.as_deref().is_some_and(|f| f != account.id()) {
                return Ok(());
            }
            if social.add_following(actor_id).await? {
                social.notify("Accept", actor_id, None).await?;
            }
        }
        Inbound::RejectFollow { follower } => {
            if follower.as_deref().is_some_and(|f| f != account.id()) {
                return Ok(());
            }
            social.remove_following(actor_id).await?;
        }
        Inbound::Like { object } => {
            if !store.is_indexed(&object) {
                debug!("like for unknown object {object}");
                return Ok(());
            }
            if social.add_like(&object, actor_id).await? {
                social.notify("Like", actor_id, Some(&object)).await?;
            }
        }
        Inbound::Announce { object } => {
            if account.owns(&object) {
                if store.is_indexed(&object) && social.add_boost(&object, actor_id).await? {
                    social.notify("Announce", actor_id, Some(&object)).await?;
                }
                return Ok(());
            }
            if !store.is_indexed(&object) {
                if let Err(e) = state.federation.fetch_object(account, &object).await {
                    debug!("boosted object unavailable: {e}");
                }
            }
            match activity.get("id").and_then(Value::as_str) {
                Some(id) if !store.is_indexed(id) && may_store(state, actor_id, id) => {
                    store.persist(activity, false).await?;
                }
                _ => {}
            }
        }
        Inbound::Create { object } => {
            let object = match object {
                Value::String(id) => state.federation.fetch_remote(account, &id).await?,
                v => v,
            };
            accept_create(state, actor_id, &object).await?;
        }
        Inbound::Update { object } => {
            let id = object.get("id").and_then(Value::as_str).unwrap_or("");
            if ACTOR_TYPES.contains(&type_of(&object)) {
                if id == actor_id {
                    let actor: Actor = serde_json::from_value(object)?;
                    state.federation.cache_actor(&actor).await?;
                }
            } else if author_of(&object).as_deref() == Some(actor_id) && may_store(state, actor_id, id) {
                store.persist(&object, false).await?;
            } else {
                debug!("update of {id} rejected for {actor_id}");
            }
        }
        Inbound::Delete { object } => {
            remove_if_authored(state, &object, actor_id).await?;
        }
        Inbound::Ignored { ty } => {
            debug!("ignoring {ty:?} from {actor_id}");
        }
    }
    Ok(())
}

async fn accept_create(state: &CoreState, actor_id: &str, object: &Value) -> Result<()> {
    let account = &state.account;
    let Some(id) = object.get("id").and_then(Value::as_str) else {
        return Ok(());
    };
    if author_of(object).as_deref() != Some(actor_id) {
        debug!("create of {id} not authored by {actor_id}");
        return Ok(());
    }
    if !may_store(state, actor_id, id) {
        debug!("create of {id} is outside {actor_id}'s origin");
        return Ok(());
    }

    let direct = object.get("directMessage").and_then(Value::as_bool) == Some(true) || {
        let rcpt = addressees(object);
        !rcpt.is_empty() && rcpt.iter().all(|r| account.is_self(r))
    };
    if direct {
        if state.social.append_dm(actor_id, object, true).await? {
            state.social.notify("DM", actor_id, Some(id)).await?;
        }
        return Ok(());
    }

    if state.store.is_indexed(id) {
        return Ok(());
    }
    state.store.persist(object, false).await?;

    let reply_to_own = object
        .get("inReplyTo")
        .and_then(Value::as_str)
        .is_some_and(|p| account.owns(p));
    if reply_to_own {
        state.social.notify("Reply", actor_id, Some(id)).await?;
    } else if mentions(account.id(), object) {
        state.social.notify("Mention", actor_id, Some(id)).await?;
    }
    Ok(())
}

fn mentions(me: &str, object: &Value) -> bool {
    let tagged = object
        .get("tag")
        .and_then(Value::as_array)
        .is_some_and(|tags| {
            tags.iter()
                .any(|t| type_of(t) == "Mention" && t.get("href").and_then(Value::as_str) == Some(me))
        });
    tagged || addressees(object).iter().any(|r| r == me)
}

/// Deletes an indexed object when `actor_id` is its author.
async fn remove_if_authored(state: &CoreState, id: &str, actor_id: &str) -> Result<()> {
    let Some(entry) = state.store.entry(id) else {
        return Ok(());
    };
    if entry.kind == EntryKind::Note || entry.actor.as_deref() != Some(actor_id) {
        debug!("{actor_id} may not delete {id}");
        return Ok(());
    }
    state.store.delete_file(id).await?;
    state.store.remove_from_index(id);
    info!("deleted {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_sig::sign_request;
    use crate::test_support::{
        other_key, remote_actor, remote_actor_with_key, test_config, test_key, test_node, test_node_with, TestNode,
    };
    use rsa::RsaPrivateKey;
    use serde_json::json;
    use skiff_protocol::LikesRecord;

    const BOB: &str = "https://remote.example/users/bob";
    const ME: &str = "https://skiff.example/u/alice";

    async fn local_note(node: &TestNode, id: &str) {
        node.state
            .store
            .persist(
                &json!({ "id": id, "type": "Note", "attributedTo": ME, "published": "2024-03-05T10:00:00Z" }),
                true,
            )
            .await
            .unwrap();
    }

    #[test]
    fn classify_covers_the_dispatch_table() {
        assert_eq!(
            classify(&json!({ "type": "Follow", "object": ME })),
            Inbound::Follow { target: Some(ME.into()) }
        );
        assert_eq!(
            classify(&json!({ "type": "Undo", "object": { "type": "Follow", "object": ME } })),
            Inbound::UndoFollow
        );
        assert_eq!(
            classify(&json!({ "type": "Undo", "object": { "type": "Like", "object": "abc" } })),
            Inbound::UndoLike { object: "abc".into() }
        );
        assert_eq!(
            classify(&json!({ "type": "Undo", "object": { "id": "b1", "type": "Announce", "object": { "id": "abc" } } })),
            Inbound::UndoAnnounce { announce: Some("b1".into()), object: "abc".into() }
        );
        assert_eq!(
            classify(&json!({ "type": "Accept", "object": { "type": "Follow", "actor": ME } })),
            Inbound::AcceptFollow { follower: Some(ME.into()) }
        );
        assert_eq!(
            classify(&json!({ "type": "Accept", "object": "https://skiff.example/u/alice/follow/1" })),
            Inbound::AcceptFollow { follower: None }
        );
        assert_eq!(
            classify(&json!({ "type": "Like", "object": "abc" })),
            Inbound::Like { object: "abc".into() }
        );
        assert_eq!(
            classify(&json!({ "type": "Delete", "object": { "id": "n1", "type": "Tombstone" } })),
            Inbound::Delete { object: "n1".into() }
        );
        assert_eq!(
            classify(&json!({ "type": "Undo", "object": "x" })),
            Inbound::Ignored { ty: "Undo".into() }
        );
        assert_eq!(classify(&json!({ "type": "Move" })), Inbound::Ignored { ty: "Move".into() });
        assert_eq!(
            classify(&json!({ "type": "Accept", "object": { "type": "Invite" } })),
            Inbound::Ignored { ty: "Accept".into() }
        );
    }

    #[test]
    fn domain_patterns() {
        assert!(domain_matches("bad.example", "bad.example"));
        assert!(!domain_matches("sub.bad.example", "bad.example"));
        assert!(domain_matches("sub.bad.example", "*.bad.example"));
        assert!(domain_matches("bad.example", ".bad.example"));
        assert!(!domain_matches("notbad.example", "*.bad.example"));
    }

    #[tokio::test]
    async fn like_is_recorded_once_and_undone() {
        let node = test_node().await;
        local_note(&node, "abc").await;
        let like = json!({ "type": "Like", "actor": "Ever", "object": "abc" });

        dispatch(&node.state, "Ever", &like).await.unwrap();
        dispatch(&node.state, "Ever", &like).await.unwrap();

        let path = node.state.store.likes_path("abc").unwrap();
        let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({ "likes": ["Ever"], "boosts": [] }));
        assert_eq!(node.state.social.notifications(10).await.unwrap().len(), 1);

        node.state.social.add_boost("abc", "Bob").await.unwrap();
        let undo = json!({ "type": "Undo", "actor": "Ever", "object": like });
        dispatch(&node.state, "Ever", &undo).await.unwrap();
        assert_eq!(
            node.state.social.likes_for("abc").await.unwrap(),
            LikesRecord { likes: vec![], boosts: vec!["Bob".into()] }
        );
    }

    #[tokio::test]
    async fn follow_adds_follower_and_sends_accept() {
        let node = test_node().await;
        node.transport.serve_actor(&remote_actor(BOB));
        let follow = json!({ "id": format!("{BOB}/follows/1"), "type": "Follow", "actor": BOB, "object": ME });

        dispatch(&node.state, BOB, &follow).await.unwrap();
        assert_eq!(node.state.social.followers().await.unwrap(), vec![BOB]);
        node.state.queue.wait_idle().await;
        let sent = node.transport.posts_to(&format!("{BOB}/inbox"));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "Accept");
        assert_eq!(sent[0]["object"], follow);

        let undo = json!({ "type": "Undo", "actor": BOB, "object": follow });
        dispatch(&node.state, BOB, &undo).await.unwrap();
        assert!(node.state.social.followers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn accept_and_reject_track_following() {
        let node = test_node().await;
        let accept = json!({ "type": "Accept", "actor": BOB, "object": { "type": "Follow", "actor": ME, "object": BOB } });
        dispatch(&node.state, BOB, &accept).await.unwrap();
        assert!(node.state.social.is_following(BOB).await.unwrap());

        let reject = json!({ "type": "Reject", "actor": BOB, "object": { "type": "Follow", "actor": ME, "object": BOB } });
        dispatch(&node.state, BOB, &reject).await.unwrap();
        assert!(!node.state.social.is_following(BOB).await.unwrap());
    }

    #[tokio::test]
    async fn reply_to_own_post_is_stored_and_notified_once() {
        let node = test_node().await;
        let parent = format!("{ME}/note/1");
        local_note(&node, &parent).await;
        let reply = json!({
            "id": "https://remote.example/notes/9",
            "type": "Note",
            "attributedTo": BOB,
            "inReplyTo": parent,
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "published": "2024-03-06T10:00:00Z"
        });
        let create = json!({ "type": "Create", "actor": BOB, "object": reply });

        dispatch(&node.state, BOB, &create).await.unwrap();
        dispatch(&node.state, BOB, &create).await.unwrap();

        assert!(node.state.store.is_indexed("https://remote.example/notes/9"));
        assert_eq!(node.state.store.reply_count(&parent), 1);
        let notes = node.state.social.notifications(10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].notification.ty, "Reply");
    }

    #[tokio::test]
    async fn mention_and_direct_message_routing() {
        let node = test_node().await;
        let mention = json!({
            "id": "https://remote.example/notes/m",
            "type": "Note",
            "attributedTo": BOB,
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "tag": [{ "type": "Mention", "href": ME }],
            "published": "2024-03-06T10:00:00Z"
        });
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": mention }))
            .await
            .unwrap();
        assert_eq!(node.state.social.notifications(1).await.unwrap()[0].notification.ty, "Mention");

        let dm = json!({ "id": "https://remote.example/notes/dm", "type": "Note", "attributedTo": BOB, "to": [ME] });
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": dm }))
            .await
            .unwrap();
        assert!(!node.state.store.is_indexed("https://remote.example/notes/dm"));
        assert_eq!(node.state.social.dm_thread(BOB).await.unwrap(), vec![dm]);
    }

    #[tokio::test]
    async fn forged_authorship_is_ignored() {
        let node = test_node().await;
        let note = json!({ "id": "https://other.example/n/1", "type": "Note", "attributedTo": "https://other.example/users/carol" });
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": note }))
            .await
            .unwrap();
        assert!(!node.state.store.is_indexed("https://other.example/n/1"));
    }

    #[tokio::test]
    async fn remote_activities_cannot_touch_local_posts() {
        let node = test_node().await;
        let own = format!("{ME}/note/7");
        local_note(&node, &own).await;
        let original = node.state.store.read(&own).await.unwrap();

        let forged = json!({ "id": own, "type": "Note", "attributedTo": BOB, "content": "pwned", "published": "2024-03-05T10:00:00Z" });
        dispatch(&node.state, BOB, &json!({ "type": "Update", "actor": BOB, "object": forged }))
            .await
            .unwrap();
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": forged }))
            .await
            .unwrap();
        dispatch(&node.state, BOB, &json!({ "type": "Delete", "actor": BOB, "object": own }))
            .await
            .unwrap();

        let entry = node.state.store.entry(&own).unwrap();
        assert_eq!(entry.kind, EntryKind::Note);
        assert_eq!(entry.actor.as_deref(), Some(ME));
        assert_eq!(node.state.store.read(&own).await.unwrap(), original);
    }

    #[tokio::test]
    async fn objects_must_live_on_the_senders_host() {
        let node = test_node().await;
        let note = json!({ "id": "https://other.example/n/2", "type": "Note", "attributedTo": BOB, "published": "2024-03-06T10:00:00Z" });
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": note }))
            .await
            .unwrap();
        dispatch(&node.state, BOB, &json!({ "type": "Update", "actor": BOB, "object": note }))
            .await
            .unwrap();
        assert!(!node.state.store.is_indexed("https://other.example/n/2"));

        let boost = json!({ "id": "https://other.example/boost/2", "type": "Announce", "actor": BOB, "object": "https://remote.example/notes/x" });
        dispatch(&node.state, BOB, &boost).await.unwrap();
        assert!(!node.state.store.is_indexed("https://other.example/boost/2"));
    }

    #[tokio::test]
    async fn create_by_reference_is_routed_like_an_embedded_object() {
        let node = test_node().await;
        let dm = json!({ "id": "https://remote.example/notes/dm2", "type": "Note", "attributedTo": BOB, "to": [ME] });
        node.transport.serve("https://remote.example/notes/dm2", dm.clone());
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": "https://remote.example/notes/dm2" }))
            .await
            .unwrap();
        assert!(!node.state.store.is_indexed("https://remote.example/notes/dm2"));
        assert_eq!(node.state.social.dm_thread(BOB).await.unwrap(), vec![dm]);
        assert_eq!(node.state.social.notifications(1).await.unwrap()[0].notification.ty, "DM");

        let parent = format!("{ME}/note/1");
        local_note(&node, &parent).await;
        let reply = json!({
            "id": "https://remote.example/notes/r2",
            "type": "Note",
            "attributedTo": BOB,
            "inReplyTo": parent,
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "published": "2024-03-06T10:00:00Z"
        });
        node.transport.serve("https://remote.example/notes/r2", reply);
        dispatch(&node.state, BOB, &json!({ "type": "Create", "actor": BOB, "object": "https://remote.example/notes/r2" }))
            .await
            .unwrap();
        assert!(node.state.store.is_indexed("https://remote.example/notes/r2"));
        assert_eq!(node.state.store.reply_count(&parent), 1);
        assert_eq!(node.state.social.notifications(1).await.unwrap()[0].notification.ty, "Reply");
    }

    #[tokio::test]
    async fn delete_requires_the_author() {
        let node = test_node().await;
        let note = json!({ "id": "https://remote.example/notes/d", "type": "Note", "attributedTo": BOB, "published": "2024-03-06T10:00:00Z" });
        node.state.store.persist(&note, false).await.unwrap();

        let carol = "https://remote.example/users/carol";
        let delete = |actor: &str| json!({ "type": "Delete", "actor": actor, "object": "https://remote.example/notes/d" });
        dispatch(&node.state, carol, &delete(carol)).await.unwrap();
        assert!(node.state.store.is_indexed("https://remote.example/notes/d"));

        dispatch(&node.state, BOB, &delete(BOB)).await.unwrap();
        assert!(!node.state.store.is_indexed("https://remote.example/notes/d"));
    }

    #[tokio::test]
    async fn announces_of_own_and_remote_posts() {
        let node = test_node().await;
        let own = format!("{ME}/note/2");
        local_note(&node, &own).await;
        let boost = json!({ "id": format!("{BOB}/boost/1"), "type": "Announce", "actor": BOB, "object": own });
        dispatch(&node.state, BOB, &boost).await.unwrap();
        assert_eq!(node.state.social.likes_for(&own).await.unwrap().boosts, vec![BOB]);
        assert!(!node.state.store.is_indexed(&format!("{BOB}/boost/1")));

        let target = json!({ "id": "https://far.example/n/1", "type": "Note", "attributedTo": "https://far.example/u/dan", "published": "2024-03-01T00:00:00Z" });
        node.transport.serve("https://far.example/n/1", target);
        let remote_boost = json!({
            "id": format!("{BOB}/boost/2"),
            "type": "Announce",
            "actor": BOB,
            "object": "https://far.example/n/1",
            "published": "2024-03-07T00:00:00Z"
        });
        dispatch(&node.state, BOB, &remote_boost).await.unwrap();
        assert!(node.state.store.is_indexed("https://far.example/n/1"));
        assert!(node.state.store.is_indexed(&format!("{BOB}/boost/2")));

        let undo = json!({ "type": "Undo", "actor": BOB, "object": remote_boost });
        dispatch(&node.state, BOB, &undo).await.unwrap();
        assert!(!node.state.store.is_indexed(&format!("{BOB}/boost/2")));
    }

    fn signed_post(body: &[u8], key_id: &str) -> (Uri, HeaderMap) {
        signed_post_with(body, key_id, test_key())
    }

    fn signed_post_with(body: &[u8], key_id: &str, key: &RsaPrivateKey) -> (Uri, HeaderMap) {
        let uri: Uri = format!("{ME}/inbox").parse().unwrap();
        let signed = sign_request(&Method::POST, &uri, key, key_id, Some(body)).unwrap();
        let mut headers = HeaderMap::new();
        signed.apply(&mut headers).unwrap();
        (uri, headers)
    }

    #[tokio::test]
    async fn signed_delivery_is_accepted() {
        let node = test_node().await;
        node.transport.serve_actor(&remote_actor(BOB));
        let body = serde_json::to_vec(&json!({ "type": "Follow", "actor": BOB, "object": ME })).unwrap();
        let (uri, headers) = signed_post(&body, &format!("{BOB}#main-key"));

        let status = handle_inbox(&node.state, &Method::POST, &uri, &headers, &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node.state.social.followers().await.unwrap(), vec![BOB]);
    }

    #[tokio::test]
    async fn tampered_or_unattributable_requests_are_forbidden() {
        let node = test_node().await;
        node.transport.serve_actor(&remote_actor(BOB));
        let body = serde_json::to_vec(&json!({ "type": "Follow", "actor": BOB, "object": ME })).unwrap();
        let (uri, headers) = signed_post(&body, &format!("{BOB}#main-key"));

        let other = serde_json::to_vec(&json!({ "type": "Follow", "actor": BOB, "object": "x" })).unwrap();
        assert_eq!(handle_inbox(&node.state, &Method::POST, &uri, &headers, &other).await, StatusCode::FORBIDDEN);

        let elsewhere: Uri = "https://skiff.example/u/alice/outbox".parse().unwrap();
        assert_eq!(handle_inbox(&node.state, &Method::POST, &elsewhere, &headers, &body).await, StatusCode::FORBIDDEN);

        let (_, foreign_key) = signed_post(&body, "https://remote.example/users/mallory#main-key");
        assert_eq!(handle_inbox(&node.state, &Method::POST, &uri, &foreign_key, &body).await, StatusCode::FORBIDDEN);

        let carol = serde_json::to_vec(&json!({ "type": "Follow", "actor": "https://remote.example/users/carol", "object": ME })).unwrap();
        let (_, carol_headers) = signed_post(&carol, "https://remote.example/users/carol#main-key");
        assert_eq!(handle_inbox(&node.state, &Method::POST, &uri, &carol_headers, &carol).await, StatusCode::FORBIDDEN);

        assert_eq!(handle_inbox(&node.state, &Method::POST, &uri, &HeaderMap::new(), &body).await, StatusCode::FORBIDDEN);
        assert!(node.state.social.followers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rotated_key_is_picked_up_by_one_refetch() {
        let node = test_node().await;
        node.state.federation.cache_actor(&remote_actor(BOB)).await.unwrap();
        let rotated = remote_actor_with_key(BOB, other_key());
        node.transport.serve_actor(&rotated);
        let body = serde_json::to_vec(&json!({ "type": "Follow", "actor": BOB, "object": ME })).unwrap();
        let (uri, headers) = signed_post_with(&body, &format!("{BOB}#main-key"), other_key());

        let status = handle_inbox(&node.state, &Method::POST, &uri, &headers, &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node.transport.get_count(BOB), 1);
        let cached = node
            .state
            .federation
            .fetch_actor_cached(&node.state.account, BOB)
            .await
            .unwrap();
        assert_eq!(cached.public_key, rotated.public_key);
        assert_eq!(node.transport.get_count(BOB), 1);
    }

    #[tokio::test]
    async fn unchanged_actor_on_refetch_is_forbidden() {
        let node = test_node().await;
        node.state.federation.cache_actor(&remote_actor(BOB)).await.unwrap();
        node.transport.serve_actor(&remote_actor(BOB));
        let body = serde_json::to_vec(&json!({ "type": "Follow", "actor": BOB, "object": ME })).unwrap();
        let (uri, headers) = signed_post_with(&body, &format!("{BOB}#main-key"), other_key());

        let status = handle_inbox(&node.state, &Method::POST, &uri, &headers, &body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(node.transport.get_count(BOB), 1);
        assert!(node.state.social.followers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let node = test_node().await;
        let body = b"not json".to_vec();
        let (uri, headers) = signed_post(&body, &format!("{BOB}#main-key"));
        assert_eq!(handle_inbox(&node.state, &Method::POST, &uri, &headers, &body).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blocked_senders_are_forbidden() {
        let mut cfg = test_config();
        cfg.blocked_domains = vec!["*.example".into()];
        let node = test_node_with(cfg).await;
        node.transport.serve_actor(&remote_actor(BOB));
        let body = serde_json::to_vec(&json!({ "type": "Follow", "actor": BOB, "object": ME })).unwrap();
        let (uri, headers) = signed_post(&body, &format!("{BOB}#main-key"));
        assert_eq!(handle_inbox(&node.state, &Method::POST, &uri, &headers, &body).await, StatusCode::FORBIDDEN);

        let node = test_node().await;
        node.state.social.block(BOB).await.unwrap();
        assert!(is_blocked(&node.state, &format!("{BOB}#main-key")).await);
        assert!(!is_blocked(&node.state, "https://remote.example/users/carol").await);
    }
}

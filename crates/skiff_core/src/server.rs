/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP surface of the node: the public ActivityPub endpoints plus a small
//! local API (guarded by the account's API key) that drives the outbox, the
//! feed and the DM log.

use crate::federation::FederationError;
use crate::social::{error_kind, SocialErrorKind};
use crate::state::CoreState;
use crate::{feed, inbox, outbox};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skiff_protocol::{ACTIVITY_JSON, AS_CONTEXT, JRD_JSON};
use std::collections::HashMap;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const API_KEY_HEADER: &str = "X-Skiff-Key";
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn router(state: CoreState) -> Router {
    let api = Router::new()
        .route("/feed", get(api_feed))
        .route("/thread", get(api_thread))
        .route("/notifications", get(api_notifications))
        .route("/queue", get(api_queue))
        .route("/notes", post(api_publish))
        .route("/follow", post(api_follow))
        .route("/unfollow", post(api_unfollow))
        .route("/block", post(api_block))
        .route("/unblock", post(api_unblock))
        .route("/react/:action", post(api_react))
        .route("/profile", post(api_profile))
        .route("/dms", get(api_dm_index).post(api_dm_send))
        .route("/dms/thread", get(api_dm_thread))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/u/:name", get(actor_get))
        .route("/u/:name/inbox", post(inbox_post))
        .route("/u/:name/outbox", get(outbox_get))
        .route("/u/:name/followers", get(followers_get))
        .route("/u/:name/following", get(following_get))
        .route("/u/:name/:kind/:key", get(object_get))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn simple(status: StatusCode, msg: &'static str) -> Response {
    (status, msg).into_response()
}

fn typed_json(content_type: &'static str, value: &impl Serialize) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            warn!("encode response: {e}");
            simple(StatusCode::INTERNAL_SERVER_ERROR, "encode error")
        }
    }
}

fn activity_json(value: &impl Serialize) -> Response {
    typed_json(ACTIVITY_JSON, value)
}

fn api_error(e: anyhow::Error) -> Response {
    let status = if error_kind(&e) == SocialErrorKind::NotIndexed {
        StatusCode::NOT_FOUND
    } else if e.downcast_ref::<FederationError>().is_some() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    warn!("api request failed: {e:#}");
    (status, Json(json!({ "error": format!("{e:#}") }))).into_response()
}

fn api_result<T: Serialize>(res: anyhow::Result<T>) -> Response {
    match res {
        Ok(v) => Json(v).into_response(),
        Err(e) => api_error(e),
    }
}

fn ordered_collection(id: String, items: Vec<Value>) -> Value {
    json!({
        "@context": AS_CONTEXT,
        "id": id,
        "type": "OrderedCollection",
        "totalItems": items.len(),
        "orderedItems": items,
    })
}

async fn require_api_key(State(state): State<CoreState>, req: Request, next: Next) -> Response {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if key.is_empty() || key != state.account.api_key {
        return simple(StatusCode::FORBIDDEN, "forbidden");
    }
    next.run(req).await
}

async fn webfinger(State(state): State<CoreState>, Query(q): Query<HashMap<String, String>>) -> Response {
    let resource = q.get("resource").map(|s| s.trim()).unwrap_or("");
    let acct = format!("acct:{}@{}", state.cfg.username, state.cfg.domain);
    if !resource.eq_ignore_ascii_case(&acct) && resource != state.account.id() {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    typed_json(JRD_JSON, &state.account.webfinger)
}

async fn actor_get(State(state): State<CoreState>, Path(name): Path<String>) -> Response {
    if name != state.cfg.username {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    activity_json(&state.account.actor)
}

async fn inbox_post(
    State(state): State<CoreState>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if name != state.cfg.username {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    inbox::handle_inbox(&state, &method, &uri, &headers, &body)
        .await
        .into_response()
}

async fn outbox_get(State(state): State<CoreState>, Path(name): Path<String>) -> Response {
    if name != state.cfg.username {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    let account = &state.account;
    let local = state
        .store
        .entries_sorted()
        .into_iter()
        .filter(|e| e.is_local())
        .take(state.cfg.feed_page_size.max(1));
    let mut items = Vec::new();
    for entry in local {
        let note = match state.store.read(&entry.id).await {
            Ok(n) => n,
            Err(e) => {
                warn!("outbox: {}: {e}", entry.id);
                continue;
            }
        };
        items.push(json!({
            "id": format!("{}/activity", entry.id),
            "type": "Create",
            "actor": account.id(),
            "published": note.get("published").cloned().unwrap_or(Value::Null),
            "to": note.get("to").cloned().unwrap_or_else(|| json!([])),
            "cc": note.get("cc").cloned().unwrap_or_else(|| json!([])),
            "object": note,
        }));
    }
    let id = account.actor.outbox.clone().unwrap_or_default();
    activity_json(&ordered_collection(id, items))
}

async fn followers_get(State(state): State<CoreState>, Path(name): Path<String>) -> Response {
    if name != state.cfg.username {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    match state.social.followers().await {
        Ok(list) => activity_json(&ordered_collection(
            state.account.followers_uri(),
            list.into_iter().map(Value::String).collect(),
        )),
        Err(e) => api_error(e),
    }
}

async fn following_get(State(state): State<CoreState>, Path(name): Path<String>) -> Response {
    if name != state.cfg.username {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    match state.social.following().await {
        Ok(list) => activity_json(&ordered_collection(
            state.account.actor.following.clone().unwrap_or_default(),
            list.into_iter().map(Value::String).collect(),
        )),
        Err(e) => api_error(e),
    }
}

/// Dereferences one of our own stored posts by its id.
async fn object_get(
    State(state): State<CoreState>,
    Path((name, kind, key)): Path<(String, String, String)>,
) -> Response {
    if name != state.cfg.username {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    let id = format!("{}/{kind}/{key}", state.account.id());
    match state.store.entry(&id) {
        Some(entry) if entry.is_local() => match state.store.read(&id).await {
            Ok(doc) => activity_json(&doc),
            Err(e) => {
                warn!("object {id}: {e}");
                simple(StatusCode::NOT_FOUND, "not found")
            }
        },
        _ => simple(StatusCode::NOT_FOUND, "not found"),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn api_feed(State(state): State<CoreState>, Query(q): Query<PageQuery>) -> Response {
    let limit = q.limit.unwrap_or(state.cfg.feed_page_size).max(1);
    api_result(feed::build_feed(&state, limit, q.offset.unwrap_or(0)).await)
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

async fn api_thread(State(state): State<CoreState>, Query(q): Query<IdQuery>) -> Response {
    api_result(feed::unroll_thread(&state, &q.id).await)
}

async fn api_notifications(State(state): State<CoreState>, Query(q): Query<PageQuery>) -> Response {
    let limit = q.limit.unwrap_or(state.cfg.feed_page_size).max(1);
    api_result(feed::notifications(&state, limit).await)
}

async fn api_queue(State(state): State<CoreState>) -> Response {
    Json(state.queue.stats()).into_response()
}

#[derive(Deserialize)]
struct NoteBody {
    content: String,
    #[serde(rename = "inReplyTo")]
    in_reply_to: Option<String>,
}

async fn api_publish(State(state): State<CoreState>, Json(body): Json<NoteBody>) -> Response {
    if body.content.trim().is_empty() {
        return simple(StatusCode::BAD_REQUEST, "empty content");
    }
    api_result(outbox::publish_note(&state, &body.content, body.in_reply_to.as_deref()).await)
}

#[derive(Deserialize)]
struct FollowBody {
    handle: String,
}

async fn api_follow(State(state): State<CoreState>, Json(body): Json<FollowBody>) -> Response {
    api_result(
        outbox::follow(&state, &body.handle)
            .await
            .map(|actor| json!({ "actor": actor })),
    )
}

#[derive(Deserialize)]
struct ActorBody {
    actor: String,
}

async fn api_unfollow(State(state): State<CoreState>, Json(body): Json<ActorBody>) -> Response {
    api_result(outbox::unfollow(&state, &body.actor).await.map(|()| json!({ "ok": true })))
}

/// Actor id or domain pattern (`bad.example`, `*.bad.example`).
#[derive(Deserialize)]
struct BlockBody {
    target: String,
}

async fn api_block(State(state): State<CoreState>, Json(body): Json<BlockBody>) -> Response {
    let target = body.target.trim();
    if target.is_empty() {
        return simple(StatusCode::BAD_REQUEST, "empty block target");
    }
    api_result(state.social.block(target).await.map(|changed| json!({ "changed": changed })))
}

async fn api_unblock(State(state): State<CoreState>, Json(body): Json<BlockBody>) -> Response {
    api_result(
        state
            .social
            .unblock(body.target.trim())
            .await
            .map(|changed| json!({ "changed": changed })),
    )
}

async fn api_react(
    State(state): State<CoreState>,
    Path(action): Path<String>,
    Json(body): Json<IdQuery>,
) -> Response {
    let res = match action.as_str() {
        "like" => outbox::like(&state, &body.id).await.map(|id| json!({ "activity": id })),
        "boost" => outbox::boost(&state, &body.id).await.map(|id| json!({ "activity": id })),
        "unlike" => outbox::unlike(&state, &body.id).await.map(|undone| json!({ "undone": undone })),
        "unboost" => outbox::unboost(&state, &body.id).await.map(|undone| json!({ "undone": undone })),
        _ => return simple(StatusCode::NOT_FOUND, "unknown reaction"),
    };
    api_result(res)
}

async fn api_profile(State(state): State<CoreState>) -> Response {
    api_result(outbox::send_profile_update(&state).map(|()| json!({ "ok": true })))
}

#[derive(Deserialize)]
struct DmBody {
    to: String,
    content: String,
}

async fn api_dm_send(State(state): State<CoreState>, Json(body): Json<DmBody>) -> Response {
    if body.content.trim().is_empty() {
        return simple(StatusCode::BAD_REQUEST, "empty content");
    }
    api_result(outbox::send_direct_message(&state, &body.to, &body.content).await)
}

async fn api_dm_index(State(state): State<CoreState>) -> Response {
    api_result(state.social.dm_index().await)
}

#[derive(Deserialize)]
struct ThreadQuery {
    with: String,
}

/// Returns the conversation and marks it read.
async fn api_dm_thread(State(state): State<CoreState>, Query(q): Query<ThreadQuery>) -> Response {
    let res = async {
        let messages = state.social.dm_thread(&q.with).await?;
        state.social.mark_dm_read(&q.with).await?;
        Ok::<_, anyhow::Error>(messages)
    }
    .await;
    api_result(res)
}

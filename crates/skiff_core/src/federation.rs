/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::account::Account;
use crate::delivery_queue::DeliveryQueue;
use crate::social::{now_ms, Social};
use crate::storage::{hash_id, Store, StoreError};
use crate::transport::{error_status, Transport};
use anyhow::{Context, Result};
use http::Uri;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skiff_protocol::{ActivityType, Actor, Webfinger, AS_CONTEXT, AS_PUBLIC};
use std::{path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("network error querying {url} (status {status:?})")]
    Network { url: String, status: Option<u16> },
    #[error("failed to load {url} (status {status:?})")]
    Load { url: String, status: Option<u16> },
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    #[error("no actor link in discovery document for {0}")]
    NoSelfLink(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handle {
    Acct { user: String, domain: String },
    Uri { uri: String, domain: String },
}

impl Handle {
    pub fn domain(&self) -> &str {
        match self {
            Handle::Acct { domain, .. } | Handle::Uri { domain, .. } => domain,
        }
    }

    /// The `resource` parameter for a discovery query.
    pub fn resource(&self) -> String {
        match self {
            Handle::Acct { user, domain } => format!("acct:{user}@{domain}"),
            Handle::Uri { uri, .. } => uri.clone(),
        }
    }
}

/// Accepts `user@domain`, `@user@domain`, `acct:user@domain` or an http(s) URI.
pub fn normalize_handle(input: &str) -> Result<Handle, FederationError> {
    let s = input.trim();
    if s.starts_with("https://") || s.starts_with("http://") {
        let uri: Uri = s
            .parse()
            .map_err(|_| FederationError::InvalidHandle(input.to_string()))?;
        let domain = uri
            .authority()
            .map(|a| a.as_str().to_ascii_lowercase())
            .ok_or_else(|| FederationError::InvalidHandle(input.to_string()))?;
        return Ok(Handle::Uri {
            uri: s.to_string(),
            domain,
        });
    }
    let s = s.strip_prefix("acct:").unwrap_or(s);
    let s = s.strip_prefix('@').unwrap_or(s);
    match s.split_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(Handle::Acct {
                user: user.to_string(),
                domain: domain.to_ascii_lowercase(),
            })
        }
        _ => Err(FederationError::InvalidHandle(input.to_string())),
    }
}

/// Actor id without the key fragment, so `…#main-key` and the bare id share a cache slot.
pub fn normalize_actor_id(id: &str) -> &str {
    let id = id.trim();
    id.split_once('#').map(|(a, _)| a).unwrap_or(id)
}

/// `to` and `cc` recipients, in order, without duplicates.
pub fn addressees(doc: &Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for field in ["to", "cc"] {
        let items: Vec<&str> = match doc.get(field) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(arr)) => arr.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        for item in items {
            if !out.iter().any(|o| o == item) {
                out.push(item.to_string());
            }
        }
    }
    out
}

/// Id of an embedded reference: a bare string or an object's `id`.
pub fn object_id(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Object(o) => o.get("id").and_then(Value::as_str),
        _ => None,
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub struct FederationSettings {
    pub fetch_timeout: Duration,
    pub delivery_timeout: Duration,
    pub actor_cache_ttl: Duration,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(10),
            actor_cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutboxPage {
    pub outbox: Option<Value>,
    pub page: Option<Value>,
    pub items: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct CachedActor {
    #[serde(rename = "fetchedAt")]
    fetched_at: i64,
    actor: Actor,
}

/// Remote lookups and outbound sends. Holds no identity: every operation takes the account it acts for.
#[derive(Clone)]
pub struct Federation {
    transport: Arc<dyn Transport>,
    store: Arc<Store>,
    social: Social,
    queue: DeliveryQueue,
    settings: FederationSettings,
}

impl Federation {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<Store>,
        social: Social,
        queue: DeliveryQueue,
        settings: FederationSettings,
    ) -> Self {
        Self {
            transport,
            store,
            social,
            queue,
            settings,
        }
    }

    pub async fn discover(&self, handle: &str) -> Result<Webfinger, FederationError> {
        let handle = normalize_handle(handle)?;
        let url = format!(
            "https://{}/.well-known/webfinger?resource={}",
            handle.domain(),
            urlencoding::encode(&handle.resource())
        );
        let doc = match self.transport.get_json(&url, None, self.settings.fetch_timeout).await {
            Ok(v) => v,
            Err(e) => {
                warn!("webfinger failed: {e:#}");
                return Err(FederationError::Network {
                    status: error_status(&e),
                    url,
                });
            }
        };
        serde_json::from_value(doc).map_err(|e| {
            warn!("webfinger decode failed for {url}: {e}");
            FederationError::Network { url, status: None }
        })
    }

    /// Signed fetch of an actor document.
    pub async fn fetch_actor(&self, account: &Account, uri: &str) -> Result<Actor, FederationError> {
        let uri = normalize_actor_id(uri);
        let doc = match self
            .transport
            .get_json(uri, Some(account), self.settings.fetch_timeout)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                debug!("actor fetch failed: {e:#}");
                return Err(FederationError::Load {
                    url: uri.to_string(),
                    status: error_status(&e),
                });
            }
        };
        serde_json::from_value(doc).map_err(|e| {
            warn!("actor decode failed for {uri}: {e}");
            FederationError::Load {
                url: uri.to_string(),
                status: None,
            }
        })
    }

    fn actor_cache_path(&self, id: &str) -> PathBuf {
        self.store
            .doc_path("actors")
            .join(format!("{}.json", hash_id(normalize_actor_id(id))))
    }

    async fn cached_actor(&self, id: &str) -> Option<CachedActor> {
        let path = self.actor_cache_path(id);
        match self.store.read_doc(&path).await {
            Ok(Some(v)) => serde_json::from_value(v).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("actor cache read failed: {e:#}");
                None
            }
        }
    }

    /// Stores an actor document as freshly fetched.
    pub async fn cache_actor(&self, actor: &Actor) -> Result<()> {
        let entry = CachedActor {
            fetched_at: now_ms(),
            actor: actor.clone(),
        };
        let path = self.actor_cache_path(&actor.id);
        self.store.write_doc(&path, &serde_json::to_value(&entry)?).await?;
        Ok(())
    }

    /// Actor from the disk cache while younger than the TTL, otherwise refetched.
    /// A stale copy is served when the refresh fails.
    pub async fn fetch_actor_cached(&self, account: &Account, uri: &str) -> Result<Actor, FederationError> {
        let cached = self.cached_actor(uri).await;
        if let Some(c) = &cached {
            let age = now_ms().saturating_sub(c.fetched_at);
            if age >= 0 && (age as u128) < self.settings.actor_cache_ttl.as_millis() {
                return Ok(c.actor.clone());
            }
        }
        match self.fetch_actor(account, uri).await {
            Ok(actor) => {
                if let Err(e) = self.cache_actor(&actor).await {
                    warn!("actor cache write failed: {e:#}");
                }
                Ok(actor)
            }
            Err(e) => match cached {
                Some(c) => {
                    warn!("serving stale actor {}: {e}", c.actor.id);
                    Ok(c.actor)
                }
                None => Err(e),
            },
        }
    }

    /// `user@domain` or an actor URI to the actor document.
    pub async fn resolve_handle(&self, account: &Account, handle: &str) -> Result<Actor, FederationError> {
        match normalize_handle(handle)? {
            Handle::Uri { uri, .. } => self.fetch_actor_cached(account, &uri).await,
            acct @ Handle::Acct { .. } => {
                let resource = acct.resource();
                let wf = self.discover(handle).await?;
                let href = wf
                    .self_href()
                    .ok_or_else(|| FederationError::NoSelfLink(resource))?
                    .to_string();
                self.fetch_actor_cached(account, &href).await
            }
        }
    }

    /// First page of the actor's outbox. Failures are logged and yield an empty page.
    pub async fn fetch_outbox(&self, account: &Account, actor: &Actor) -> OutboxPage {
        let Some(outbox_url) = actor.outbox.as_deref() else {
            return OutboxPage::default();
        };
        let outbox = match self
            .transport
            .get_json(outbox_url, Some(account), self.settings.fetch_timeout)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!("outbox fetch failed: {e:#}");
                return OutboxPage::default();
            }
        };

        let page = match outbox.get("first") {
            Some(Value::String(url)) => {
                match self
                    .transport
                    .get_json(url, Some(account), self.settings.fetch_timeout)
                    .await
                {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!("outbox page fetch failed: {e:#}");
                        None
                    }
                }
            }
            Some(v @ Value::Object(_)) => Some(v.clone()),
            _ => None,
        };

        let items = page
            .as_ref()
            .unwrap_or(&outbox)
            .get("orderedItems")
            .or_else(|| page.as_ref().unwrap_or(&outbox).get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        OutboxPage {
            outbox: Some(outbox),
            page,
            items,
        }
    }

    /// Index first; otherwise a signed fetch that persists the object as a remote
    /// activity. An unfetchable object is remembered as a failed entry.
    pub async fn fetch_object(&self, account: &Account, uri: &str) -> Result<Value, StoreError> {
        if self.store.is_indexed(uri) {
            return self.store.read(uri).await;
        }
        if account.owns(uri) {
            return Err(StoreError::NotIndexed(uri.to_string()));
        }

        let Some(doc) = self.get_object(account, uri).await else {
            self.store.mark_failed(uri);
            return Err(StoreError::FetchFailed(uri.to_string()));
        };
        let id = doc.get("id").and_then(Value::as_str).unwrap_or(uri).to_string();
        if id != uri && self.store.is_indexed(&id) {
            return self.store.read(&id).await;
        }
        if account.owns(&id) {
            warn!("{uri} answered with local id {id}");
            self.store.mark_failed(uri);
            return Err(StoreError::FetchFailed(uri.to_string()));
        }
        self.store.persist(&doc, false).await?;
        Ok(doc)
    }

    /// Like [`Federation::fetch_object`] but never writes the index. The caller
    /// decides whether the document is kept.
    pub async fn fetch_remote(&self, account: &Account, uri: &str) -> Result<Value, StoreError> {
        if self.store.is_indexed(uri) {
            return self.store.read(uri).await;
        }
        if account.owns(uri) {
            return Err(StoreError::NotIndexed(uri.to_string()));
        }
        self.get_object(account, uri)
            .await
            .ok_or_else(|| StoreError::FetchFailed(uri.to_string()))
    }

    /// Signed GET of an object document. Documents without an id are rejected.
    async fn get_object(&self, account: &Account, uri: &str) -> Option<Value> {
        let doc = match self
            .transport
            .get_json(uri, Some(account), self.settings.fetch_timeout)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!("object fetch failed: {e:#}");
                return None;
            }
        };
        if doc.get("id").and_then(Value::as_str).is_none() {
            warn!("object {uri} has no id");
            return None;
        }
        Some(doc)
    }

    /// Queues `envelope` for delivery. Recipients are resolved when the task runs,
    /// and each inbox then gets its own POST task.
    pub fn send(&self, account: &Arc<Account>, envelope: Value, recipients: Vec<String>) {
        let fed = self.clone();
        let account = account.clone();
        self.queue.push(move || {
            Box::pin(async move { fed.fan_out(account, envelope, recipients).await })
        });
    }

    async fn fan_out(&self, account: Arc<Account>, envelope: Value, recipients: Vec<String>) -> Result<()> {
        let id = envelope.get("id").and_then(Value::as_str).unwrap_or("-").to_string();
        let body = Arc::new(serde_json::to_vec(&envelope)?);
        let inboxes = self.resolve_inboxes(&account, &recipients).await;
        if inboxes.is_empty() {
            debug!("no inboxes for {id}");
            return Ok(());
        }

        debug!("queueing {id} for {} inboxes", inboxes.len());
        for inbox in inboxes {
            let fed = self.clone();
            let account = account.clone();
            let body = body.clone();
            let id = id.clone();
            self.queue.push(move || {
                Box::pin(async move {
                    fed.transport
                        .post_json(&inbox, &account, &body, fed.settings.delivery_timeout)
                        .await
                        .with_context(|| format!("deliver {id} to {inbox}"))
                })
            });
        }
        Ok(())
    }

    /// Expands the followers sentinel against the current follower set, then maps
    /// each actor to its inbox (shared inbox preferred).
    async fn resolve_inboxes(&self, account: &Account, recipients: &[String]) -> Vec<String> {
        let followers_uri = account.followers_uri();
        let mut actors: Vec<String> = Vec::new();
        for r in recipients {
            if *r == followers_uri {
                match self.social.followers().await {
                    Ok(list) => actors.extend(list),
                    Err(e) => warn!("load followers: {e:#}"),
                }
            } else if r != AS_PUBLIC {
                actors.push(r.clone());
            }
        }

        let mut seen_actors: Vec<&str> = Vec::new();
        let mut inboxes: Vec<String> = Vec::new();
        for actor_id in &actors {
            if account.is_self(actor_id) || seen_actors.contains(&actor_id.as_str()) {
                continue;
            }
            seen_actors.push(actor_id);
            match self.fetch_actor_cached(account, actor_id).await {
                Ok(actor) => {
                    let inbox = actor.delivery_inbox().to_string();
                    if !inboxes.contains(&inbox) {
                        inboxes.push(inbox);
                    }
                }
                Err(e) => warn!("resolve recipient {actor_id}: {e}"),
            }
        }
        inboxes
    }
}

fn base(account: &Account, ty: ActivityType) -> serde_json::Map<String, Value> {
    let mut m = serde_json::Map::new();
    m.insert("@context".into(), json!(AS_CONTEXT));
    m.insert("id".into(), json!(account.new_child_id(ty)));
    m.insert("type".into(), json!(ty.as_str()));
    m.insert("actor".into(), json!(account.id()));
    m
}

pub fn build_like(account: &Account, object_id: &str, author: Option<&str>) -> Value {
    let mut m = base(account, ActivityType::Like);
    m.insert("object".into(), json!(object_id));
    if let Some(a) = author {
        m.insert("to".into(), json!([a]));
    }
    Value::Object(m)
}

pub fn build_undo_like(account: &Account, like_id: &str, object_id: &str, author: Option<&str>) -> Value {
    let mut m = base(account, ActivityType::Undo);
    m.insert(
        "object".into(),
        json!({ "id": like_id, "type": "Like", "actor": account.id(), "object": object_id }),
    );
    if let Some(a) = author {
        m.insert("to".into(), json!([a]));
    }
    Value::Object(m)
}

pub fn build_follow(account: &Account, target: &str) -> Value {
    let mut m = base(account, ActivityType::Follow);
    m.insert("object".into(), json!(target));
    m.insert("to".into(), json!([target]));
    Value::Object(m)
}

pub fn build_undo_follow(account: &Account, target: &str) -> Value {
    let mut m = base(account, ActivityType::Undo);
    m.insert(
        "object".into(),
        json!({ "type": "Follow", "actor": account.id(), "object": target }),
    );
    m.insert("to".into(), json!([target]));
    Value::Object(m)
}

pub fn build_accept(account: &Account, follow: &Value) -> Value {
    let mut m = base(account, ActivityType::Accept);
    if let Some(requester) = follow.get("actor").and_then(object_id) {
        m.insert("to".into(), json!([requester]));
    }
    m.insert("object".into(), follow.clone());
    Value::Object(m)
}

pub fn build_update(account: &Account, object: Value) -> Value {
    let mut m = base(account, ActivityType::Update);
    m.insert("object".into(), object);
    m.insert("to".into(), json!([AS_PUBLIC]));
    m.insert("cc".into(), json!([account.followers_uri()]));
    Value::Object(m)
}

/// Wraps a note, copying its addressing and publish time.
pub fn build_create(account: &Account, note: &Value) -> Value {
    let mut m = base(account, ActivityType::Create);
    for field in ["to", "cc", "published"] {
        if let Some(v) = note.get(field) {
            m.insert(field.into(), v.clone());
        }
    }
    m.insert("object".into(), note.clone());
    Value::Object(m)
}

pub fn build_announce(account: &Account, object_id: &str, author: Option<&str>) -> Value {
    let mut m = base(account, ActivityType::Announce);
    m.insert("object".into(), json!(object_id));
    m.insert("published".into(), json!(now_rfc3339()));
    m.insert("to".into(), json!([AS_PUBLIC]));
    m.insert("cc".into(), json!(boost_cc(account, author)));
    Value::Object(m)
}

pub fn build_undo_announce(account: &Account, announce_id: &str, object_id: &str, author: Option<&str>) -> Value {
    let mut m = base(account, ActivityType::Undo);
    m.insert(
        "object".into(),
        json!({ "id": announce_id, "type": "Announce", "actor": account.id(), "object": object_id }),
    );
    m.insert("to".into(), json!([AS_PUBLIC]));
    m.insert("cc".into(), json!(boost_cc(account, author)));
    Value::Object(m)
}

fn boost_cc(account: &Account, author: Option<&str>) -> Vec<String> {
    let mut cc = vec![account.followers_uri()];
    if let Some(a) = author {
        cc.push(a.to_string());
    }
    cc
}

/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Fixtures shared by the unit tests.

use crate::account::Account;
use crate::config::NodeConfig;
use crate::state::CoreState;
use crate::transport::{StatusError, Transport};
use anyhow::Result;
use async_trait::async_trait;
use rsa::{
    pkcs8::{EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use serde_json::Value;
use skiff_protocol::{Actor, PublicKey};
use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::Duration,
};
use tokio::sync::watch;

/// One 1024-bit key per test binary; shared by the local account and every fake remote actor.
pub fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap())
}

/// A second key, for remote actors that rotate away from [`test_key`].
pub fn other_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap())
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        username: "alice".into(),
        domain: "skiff.example".into(),
        public_base_url: "https://skiff.example".into(),
        queue_min_interval_ms: 0,
        ..NodeConfig::default()
    }
}

pub fn test_account() -> Account {
    Account::from_key(&test_config(), test_key().clone()).unwrap()
}

pub fn remote_actor(id: &str) -> Actor {
    remote_actor_with_key(id, test_key())
}

pub fn remote_actor_with_key(id: &str, key: &RsaPrivateKey) -> Actor {
    let pem = RsaPublicKey::from(key)
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    Actor {
        context: None,
        id: id.to_string(),
        ty: "Person".into(),
        preferred_username: id.rsplit('/').next().map(str::to_string),
        name: None,
        summary: None,
        url: None,
        icon: None,
        inbox: format!("{id}/inbox"),
        outbox: Some(format!("{id}/outbox")),
        followers: Some(format!("{id}/followers")),
        following: Some(format!("{id}/following")),
        endpoints: None,
        public_key: Some(PublicKey {
            id: format!("{id}#main-key"),
            owner: id.to_string(),
            public_key_pem: pem,
        }),
        extra: Default::default(),
    }
}

/// Serves canned documents by URL (404 otherwise) and records every request.
#[derive(Default)]
pub struct FakeTransport {
    docs: Mutex<HashMap<String, Value>>,
    gets: Mutex<Vec<(String, bool)>>,
    posts: Mutex<Vec<(String, Value)>>,
    refusing: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn serve(&self, url: &str, doc: Value) {
        self.docs.lock().unwrap().insert(url.to_string(), doc);
    }

    pub fn serve_actor(&self, actor: &Actor) {
        self.serve(&actor.id, serde_json::to_value(actor).unwrap());
    }

    pub fn forget(&self, url: &str) {
        self.docs.lock().unwrap().remove(url);
    }

    /// Later POSTs to `inbox` are recorded and then answered with a 503.
    pub fn refuse_posts_to(&self, inbox: &str) {
        self.refusing.lock().unwrap().push(inbox.to_string());
    }

    pub fn get_count(&self, url: &str) -> usize {
        self.gets.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }

    pub fn was_signed(&self, url: &str) -> bool {
        self.gets.lock().unwrap().iter().any(|(u, signed)| u == url && *signed)
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn posts_to(&self, inbox: &str) -> Vec<Value> {
        self.posts()
            .into_iter()
            .filter(|(u, _)| u == inbox)
            .map(|(_, v)| v)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_json(&self, url: &str, signer: Option<&Account>, _timeout: Duration) -> Result<Value> {
        self.gets.lock().unwrap().push((url.to_string(), signer.is_some()));
        let doc = self.docs.lock().unwrap().get(url).cloned();
        doc.ok_or_else(|| {
            StatusError {
                method: "GET",
                url: url.to_string(),
                status: 404,
            }
            .into()
        })
    }

    async fn post_json(&self, url: &str, _signer: &Account, body: &[u8], _timeout: Duration) -> Result<()> {
        let v: Value = serde_json::from_slice(body)?;
        self.posts.lock().unwrap().push((url.to_string(), v));
        if self.refusing.lock().unwrap().iter().any(|u| u == url) {
            return Err(StatusError {
                method: "POST",
                url: url.to_string(),
                status: 503,
            }
            .into());
        }
        Ok(())
    }
}

pub struct TestNode {
    pub state: CoreState,
    pub transport: std::sync::Arc<FakeTransport>,
    pub dir: tempfile::TempDir,
    _shutdown: watch::Sender<bool>,
}

pub async fn test_node() -> TestNode {
    test_node_with(test_config()).await
}

pub async fn test_node_with(cfg: NodeConfig) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let transport = std::sync::Arc::new(FakeTransport::default());
    let (tx, rx) = watch::channel(false);
    let account = Account::from_key(&cfg, test_key().clone()).unwrap();
    let state = CoreState::assemble(cfg, account, dir.path(), transport.clone(), rx).unwrap();
    TestNode {
        state,
        transport,
        dir,
        _shutdown: tx,
    }
}

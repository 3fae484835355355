/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use skiff_protocol::{
    ActivityType, Actor, ActorEndpoints, PublicKey, Webfinger, WebfingerLink, ACTIVITY_JSON,
    AS_CONTEXT, SECURITY_CONTEXT,
};
use std::{fs, path::Path};
use tracing::info;

const ACCOUNT_FILE: &str = "account.json";

/// The single local identity: actor document, signing key, API credential.
#[derive(Clone)]
pub struct Account {
    pub actor: Actor,
    pub private_key: RsaPrivateKey,
    pub private_key_pem: String,
    pub api_key: String,
    pub webfinger: Webfinger,
}

#[derive(Serialize, Deserialize)]
struct AccountFile {
    actor: Actor,
    #[serde(rename = "privateKey")]
    private_key_pem: String,
    apikey: String,
    webfinger: Webfinger,
}

impl Account {
    pub fn load_or_create(data_dir: impl AsRef<Path>, cfg: &NodeConfig) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("create data dir: {}", dir.display()))?;
        let path = dir.join(ACCOUNT_FILE);

        if path.exists() {
            let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            let file: AccountFile =
                serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
            let private_key = RsaPrivateKey::from_pkcs8_pem(&file.private_key_pem)
                .context("parse private key pem")?;
            return Ok(Self {
                actor: file.actor,
                private_key,
                private_key_pem: file.private_key_pem,
                api_key: file.apikey,
                webfinger: file.webfinger,
            });
        }

        info!("creating account {}@{}", cfg.username, cfg.domain);
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)?;
        let account = Self::from_key(cfg, private_key)?;
        let file = AccountFile {
            actor: account.actor.clone(),
            private_key_pem: account.private_key_pem.clone(),
            apikey: account.api_key.clone(),
            webfinger: account.webfinger.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename {}", path.display()))?;
        Ok(account)
    }

    /// Builds the actor and webfinger documents around an existing key.
    pub fn from_key(cfg: &NodeConfig, private_key: RsaPrivateKey) -> Result<Self> {
        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)?
            .to_string();

        let base = cfg.base_url();
        let actor_id = cfg.actor_url();
        let actor = Actor {
            context: Some(serde_json::json!([AS_CONTEXT, SECURITY_CONTEXT])),
            id: actor_id.clone(),
            ty: "Person".to_string(),
            preferred_username: Some(cfg.username.clone()),
            name: cfg.display_name.clone(),
            summary: cfg.summary.clone(),
            url: Some(serde_json::Value::String(format!("{base}/@{}", cfg.username))),
            icon: None,
            inbox: format!("{actor_id}/inbox"),
            outbox: Some(format!("{actor_id}/outbox")),
            followers: Some(format!("{actor_id}/followers")),
            following: Some(format!("{actor_id}/following")),
            endpoints: Some(ActorEndpoints { shared_inbox: None }),
            public_key: Some(PublicKey {
                id: format!("{actor_id}#main-key"),
                owner: actor_id.clone(),
                public_key_pem,
            }),
            extra: Default::default(),
        };
        let webfinger = Webfinger {
            subject: format!("acct:{}@{}", cfg.username, cfg.domain),
            links: vec![WebfingerLink {
                rel: "self".to_string(),
                ty: Some(ACTIVITY_JSON.to_string()),
                href: Some(actor_id),
            }],
        };

        Ok(Self {
            actor,
            private_key,
            private_key_pem,
            api_key: random_hex(),
            webfinger,
        })
    }

    pub fn id(&self) -> &str {
        &self.actor.id
    }

    pub fn key_id(&self) -> String {
        self.actor
            .public_key
            .as_ref()
            .map(|k| k.id.clone())
            .unwrap_or_else(|| format!("{}#main-key", self.actor.id))
    }

    /// The followers-collection reference; as a recipient it means "every current follower".
    pub fn followers_uri(&self) -> String {
        self.actor
            .followers
            .clone()
            .unwrap_or_else(|| format!("{}/followers", self.actor.id))
    }

    pub fn new_child_id(&self, ty: ActivityType) -> String {
        format!("{}/{}/{}", self.actor.id, ty.verb(), random_hex())
    }

    pub fn is_self(&self, actor_id: &str) -> bool {
        self.actor.id == actor_id
    }

    /// True when `id` names something published under this account.
    pub fn owns(&self, id: &str) -> bool {
        id.starts_with(&format!("{}/", self.actor.id))
    }
}

/// 16 random bytes -> 32 hex chars
pub fn random_hex() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

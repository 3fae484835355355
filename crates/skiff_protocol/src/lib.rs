/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";
pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";
pub const ACTIVITY_JSON: &str = "application/activity+json";
pub const ACTIVITY_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";
pub const JRD_JSON: &str = "application/jrd+json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicKey {
    pub id: String,
    pub owner: String,
    #[serde(rename = "publicKeyPem")]
    pub public_key_pem: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActorEndpoints {
    #[serde(rename = "sharedInbox", skip_serializing_if = "Option::is_none")]
    pub shared_inbox: Option<String>,
}

/// A federated identity as served by its home node. Unknown fields are kept
/// in `extra` so a fetched document can be re-served unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    #[serde(rename = "type", default = "default_actor_type")]
    pub ty: String,
    #[serde(rename = "preferredUsername", default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Value>,
    pub inbox: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<ActorEndpoints>,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_actor_type() -> String {
    "Person".to_string()
}

impl Actor {
    /// Inbox to deliver to, preferring the shared inbox when advertised.
    pub fn delivery_inbox(&self) -> &str {
        self.endpoints
            .as_ref()
            .and_then(|e| e.shared_inbox.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.inbox)
    }

    pub fn public_key_pem(&self) -> Option<&str> {
        self.public_key.as_ref().map(|k| k.public_key_pem.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webfinger {
    pub subject: String,
    #[serde(default)]
    pub links: Vec<WebfingerLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebfingerLink {
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl Webfinger {
    /// The actor URI from the `self` link with an ActivityPub content type.
    pub fn self_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| {
                l.rel == "self"
                    && l.ty
                        .as_deref()
                        .map(|t| t.contains("activity+json") || t.contains("ld+json"))
                        .unwrap_or(false)
            })
            .and_then(|l| l.href.as_deref())
    }
}

/// Likers and boosters of one local post, stored as `<hash>.likes.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LikesRecord {
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub boosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Epoch millis.
    pub time: i64,
    pub notification: NotificationBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationBody {
    #[serde(rename = "type")]
    pub ty: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Note,
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Like,
    Announce,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "Note",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::Announce => "Announce",
        }
    }

    /// Path segment used in child activity ids (`<actor>/<verb>/<hex>`).
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Follow => "follow",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Undo => "undo",
            Self::Like => "like",
            Self::Announce => "boost",
        }
    }
}

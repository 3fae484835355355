/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::storage::{hash_id, Store, StoreError};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use skiff_protocol::{LikesRecord, Notification, NotificationBody};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;

const FOLLOWERS: &str = "followers.json";
const FOLLOWING: &str = "following.json";
const OWN_LIKES: &str = "likes.json";
const OWN_BOOSTS: &str = "boosts.json";
const NOTIFICATIONS: &str = "notifications.json";
const BLOCKS: &str = "blocks.json";
const DM_INDEX: &str = "inboxIndex.json";
const DM_DIR: &str = "dms";

/// One of the local account's own reactions: the post and the activity that reacted to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnReaction {
    pub id: String,
    #[serde(rename = "activityId")]
    pub activity_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DmSummary {
    /// Epoch millis of the newest message.
    pub latest: i64,
    /// Epoch millis the conversation was last opened.
    #[serde(rename = "lastRead")]
    pub last_read: i64,
}

impl DmSummary {
    pub fn unread(&self) -> bool {
        self.latest > self.last_read
    }
}

/// Follow graph, reactions, notifications and DMs, each persisted as a JSON
/// document through the store's cache. Read-modify-write cycles hold one
/// mutex so concurrent inbound deliveries cannot lose updates.
#[derive(Clone)]
pub struct Social {
    store: Arc<Store>,
    write: Arc<Mutex<()>>,
}

impl Social {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            write: Arc::new(Mutex::new(())),
        }
    }

    async fn load<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        match self.store.read_doc(path).await? {
            Some(v) => serde_json::from_value(v).with_context(|| format!("decode {}", path.display())),
            None => Ok(T::default()),
        }
    }

    async fn save<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let v = serde_json::to_value(value)?;
        self.store.write_doc(path, &v).await?;
        Ok(())
    }

    async fn list(&self, name: &str) -> Result<Vec<String>> {
        self.load(&self.store.doc_path(name)).await
    }

    async fn list_insert(&self, name: &str, item: &str) -> Result<bool> {
        let _w = self.write.lock().await;
        let path = self.store.doc_path(name);
        let mut items: Vec<String> = self.load(&path).await?;
        if items.iter().any(|i| i == item) {
            return Ok(false);
        }
        items.push(item.to_string());
        self.save(&path, &items).await?;
        Ok(true)
    }

    async fn list_remove(&self, name: &str, item: &str) -> Result<bool> {
        let _w = self.write.lock().await;
        let path = self.store.doc_path(name);
        let mut items: Vec<String> = self.load(&path).await?;
        let before = items.len();
        items.retain(|i| i != item);
        if items.len() == before {
            return Ok(false);
        }
        self.save(&path, &items).await?;
        Ok(true)
    }

    pub async fn followers(&self) -> Result<Vec<String>> {
        self.list(FOLLOWERS).await
    }

    pub async fn add_follower(&self, actor: &str) -> Result<bool> {
        self.list_insert(FOLLOWERS, actor).await
    }

    pub async fn remove_follower(&self, actor: &str) -> Result<bool> {
        self.list_remove(FOLLOWERS, actor).await
    }

    pub async fn following(&self) -> Result<Vec<String>> {
        self.list(FOLLOWING).await
    }

    pub async fn is_following(&self, actor: &str) -> Result<bool> {
        Ok(self.following().await?.iter().any(|a| a == actor))
    }

    pub async fn add_following(&self, actor: &str) -> Result<bool> {
        self.list_insert(FOLLOWING, actor).await
    }

    pub async fn remove_following(&self, actor: &str) -> Result<bool> {
        self.list_remove(FOLLOWING, actor).await
    }

    /// Likers/boosters of an indexed post; empty when nothing was recorded yet.
    pub async fn likes_for(&self, post_id: &str) -> Result<LikesRecord> {
        let path = self.store.likes_path(post_id)?;
        self.load(&path).await
    }

    async fn update_likes<F>(&self, post_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut LikesRecord) -> bool,
    {
        let _w = self.write.lock().await;
        let path = self.store.likes_path(post_id)?;
        let mut record: LikesRecord = self.load(&path).await?;
        if !f(&mut record) {
            return Ok(false);
        }
        self.save(&path, &record).await?;
        Ok(true)
    }

    pub async fn add_like(&self, post_id: &str, actor: &str) -> Result<bool> {
        self.update_likes(post_id, |r| push_unique(&mut r.likes, actor)).await
    }

    pub async fn remove_like(&self, post_id: &str, actor: &str) -> Result<bool> {
        self.update_likes(post_id, |r| remove_item(&mut r.likes, actor)).await
    }

    pub async fn add_boost(&self, post_id: &str, actor: &str) -> Result<bool> {
        self.update_likes(post_id, |r| push_unique(&mut r.boosts, actor)).await
    }

    pub async fn remove_boost(&self, post_id: &str, actor: &str) -> Result<bool> {
        self.update_likes(post_id, |r| remove_item(&mut r.boosts, actor)).await
    }

    async fn own_reactions(&self, name: &str) -> Result<Vec<OwnReaction>> {
        self.load(&self.store.doc_path(name)).await
    }

    async fn set_own_reaction(&self, name: &str, post_id: &str, activity_id: Option<&str>) -> Result<Option<String>> {
        let _w = self.write.lock().await;
        let path = self.store.doc_path(name);
        let mut items: Vec<OwnReaction> = self.load(&path).await?;
        let previous = items.iter().position(|r| r.id == post_id).map(|i| items.remove(i).activity_id);
        if let Some(activity_id) = activity_id {
            items.push(OwnReaction {
                id: post_id.to_string(),
                activity_id: activity_id.to_string(),
            });
        }
        self.save(&path, &items).await?;
        Ok(previous)
    }

    /// Id of the Like the local account sent for `post_id`, if any.
    pub async fn own_like(&self, post_id: &str) -> Result<Option<String>> {
        Ok(self
            .own_reactions(OWN_LIKES)
            .await?
            .into_iter()
            .find(|r| r.id == post_id)
            .map(|r| r.activity_id))
    }

    pub async fn record_own_like(&self, post_id: &str, activity_id: &str) -> Result<()> {
        self.set_own_reaction(OWN_LIKES, post_id, Some(activity_id)).await?;
        Ok(())
    }

    pub async fn forget_own_like(&self, post_id: &str) -> Result<Option<String>> {
        self.set_own_reaction(OWN_LIKES, post_id, None).await
    }

    pub async fn own_boost(&self, post_id: &str) -> Result<Option<String>> {
        Ok(self
            .own_reactions(OWN_BOOSTS)
            .await?
            .into_iter()
            .find(|r| r.id == post_id)
            .map(|r| r.activity_id))
    }

    pub async fn record_own_boost(&self, post_id: &str, activity_id: &str) -> Result<()> {
        self.set_own_reaction(OWN_BOOSTS, post_id, Some(activity_id)).await?;
        Ok(())
    }

    pub async fn forget_own_boost(&self, post_id: &str) -> Result<Option<String>> {
        self.set_own_reaction(OWN_BOOSTS, post_id, None).await
    }

    pub async fn notify(&self, ty: &str, actor: &str, object: Option<&str>) -> Result<()> {
        let _w = self.write.lock().await;
        let path = self.store.doc_path(NOTIFICATIONS);
        let mut items: Vec<Notification> = self.load(&path).await?;
        items.push(Notification {
            time: now_ms(),
            notification: NotificationBody {
                ty: ty.to_string(),
                actor: actor.to_string(),
                object: object.map(str::to_string),
            },
        });
        self.save(&path, &items).await
    }

    /// Newest first.
    pub async fn notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        let items: Vec<Notification> = self.load(&self.store.doc_path(NOTIFICATIONS)).await?;
        Ok(items.into_iter().rev().take(limit).collect())
    }

    pub async fn blocks(&self) -> Result<Vec<String>> {
        self.list(BLOCKS).await
    }

    pub async fn block(&self, actor_or_domain: &str) -> Result<bool> {
        self.list_insert(BLOCKS, actor_or_domain).await
    }

    pub async fn unblock(&self, actor_or_domain: &str) -> Result<bool> {
        self.list_remove(BLOCKS, actor_or_domain).await
    }

    fn dm_path(&self, counterparty: &str) -> PathBuf {
        self.store
            .doc_path(DM_DIR)
            .join(format!("{}.json", hash_id(counterparty)))
    }

    /// Appends a message to the conversation with `counterparty`. Returns false for a re-delivery.
    pub async fn append_dm(&self, counterparty: &str, message: &Value, incoming: bool) -> Result<bool> {
        let _w = self.write.lock().await;
        let path = self.dm_path(counterparty);
        let mut messages: Vec<Value> = self.load(&path).await?;
        let id = message.get("id").and_then(Value::as_str);
        if id.is_some() && messages.iter().any(|m| m.get("id").and_then(Value::as_str) == id) {
            return Ok(false);
        }
        messages.push(message.clone());
        self.save(&path, &messages).await?;

        let index_path = self.store.doc_path(DM_INDEX);
        let mut index: BTreeMap<String, DmSummary> = self.load(&index_path).await?;
        let now = now_ms();
        let summary = index.entry(counterparty.to_string()).or_default();
        summary.latest = now;
        if !incoming {
            summary.last_read = now;
        }
        self.save(&index_path, &index).await?;
        Ok(true)
    }

    pub async fn dm_thread(&self, counterparty: &str) -> Result<Vec<Value>> {
        self.load(&self.dm_path(counterparty)).await
    }

    pub async fn dm_index(&self) -> Result<BTreeMap<String, DmSummary>> {
        self.load(&self.store.doc_path(DM_INDEX)).await
    }

    pub async fn mark_dm_read(&self, counterparty: &str) -> Result<()> {
        let _w = self.write.lock().await;
        let path = self.store.doc_path(DM_INDEX);
        let mut index: BTreeMap<String, DmSummary> = self.load(&path).await?;
        if let Some(summary) = index.get_mut(counterparty) {
            summary.last_read = now_ms();
            self.save(&path, &index).await?;
        }
        Ok(())
    }
}

/// Coarse classification of a social-state failure, for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialErrorKind {
    NotIndexed,
    Other,
}

pub fn error_kind(e: &anyhow::Error) -> SocialErrorKind {
    match e.downcast_ref::<StoreError>() {
        Some(StoreError::NotIndexed(_)) => SocialErrorKind::NotIndexed,
        _ => SocialErrorKind::Other,
    }
}

fn push_unique(items: &mut Vec<String>, item: &str) -> bool {
    if items.iter().any(|i| i == item) {
        return false;
    }
    items.push(item.to_string());
    true
}

fn remove_item(items: &mut Vec<String>, item: &str) -> bool {
    let before = items.len();
    items.retain(|i| i != item);
    items.len() != before
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CacheSettings;
    use serde_json::json;

    async fn open() -> (tempfile::TempDir, Arc<Store>, Social) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), CacheSettings::default()).unwrap());
        let social = Social::new(store.clone());
        (dir, store, social)
    }

    #[tokio::test]
    async fn follower_set_keeps_insertion_order_without_duplicates() {
        let (_dir, _store, social) = open().await;
        assert!(social.add_follower("b").await.unwrap());
        assert!(social.add_follower("a").await.unwrap());
        assert!(!social.add_follower("b").await.unwrap());
        assert_eq!(social.followers().await.unwrap(), vec!["b", "a"]);
        assert!(social.remove_follower("b").await.unwrap());
        assert!(!social.remove_follower("b").await.unwrap());
        assert_eq!(social.followers().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn like_record_is_written_next_to_the_post() {
        let (_dir, store, social) = open().await;
        store
            .persist(&json!({ "id": "abc", "type": "Note", "published": "2024-03-05T10:00:00Z" }), true)
            .await
            .unwrap();

        assert!(social.add_like("abc", "Ever").await.unwrap());
        assert!(!social.add_like("abc", "Ever").await.unwrap());

        let path = store.likes_path("abc").unwrap();
        let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({ "likes": ["Ever"], "boosts": [] }));

        assert!(social.remove_like("abc", "Ever").await.unwrap());
        assert_eq!(social.likes_for("abc").await.unwrap(), LikesRecord::default());
    }

    #[tokio::test]
    async fn likes_on_unknown_post_are_not_indexed_errors() {
        let (_dir, _store, social) = open().await;
        let err = social.add_like("missing", "Ever").await.unwrap_err();
        assert_eq!(error_kind(&err), SocialErrorKind::NotIndexed);
    }

    #[tokio::test]
    async fn own_reactions_remember_activity_ids() {
        let (_dir, _store, social) = open().await;
        social.record_own_like("post", "like-1").await.unwrap();
        assert_eq!(social.own_like("post").await.unwrap().as_deref(), Some("like-1"));
        social.record_own_like("post", "like-2").await.unwrap();
        assert_eq!(social.forget_own_like("post").await.unwrap().as_deref(), Some("like-2"));
        assert!(social.own_like("post").await.unwrap().is_none());
        assert!(social.own_boost("post").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn notifications_read_newest_first() {
        let (_dir, _store, social) = open().await;
        social.notify("Follow", "a", None).await.unwrap();
        social.notify("Like", "b", Some("post")).await.unwrap();
        let items = social.notifications(10).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].notification.ty, "Like");
        assert_eq!(items[1].notification.ty, "Follow");
        assert_eq!(social.notifications(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dms_dedupe_and_track_unread() {
        let (_dir, _store, social) = open().await;
        let msg = json!({ "id": "m1", "type": "Note", "content": "hi" });
        assert!(social.append_dm("bob", &msg, true).await.unwrap());
        assert!(!social.append_dm("bob", &msg, true).await.unwrap());
        assert_eq!(social.dm_thread("bob").await.unwrap().len(), 1);
        assert!(social.dm_index().await.unwrap()["bob"].unread());
        social.mark_dm_read("bob").await.unwrap();
        assert!(!social.dm_index().await.unwrap()["bob"].unread());
    }
}

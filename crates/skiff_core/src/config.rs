/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub username: String,
    pub domain: String,
    /// Base URL the node is reachable at; defaults to `https://<domain>`.
    #[serde(alias = "base_url")]
    pub public_base_url: String,
    pub bind: String,
    pub data_dir: Option<String>,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    /// Block inbound interactions with these domains (exact or suffix, e.g. `example.com` or `*.example.com`).
    pub blocked_domains: Vec<String>,
    /// Block inbound interactions with these actors (exact actor id URL).
    pub blocked_actors: Vec<String>,
    pub max_date_skew_secs: u64,
    pub fetch_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
    pub queue_concurrency: usize,
    pub queue_min_interval_ms: u64,
    pub cache_max_age_secs: u64,
    pub cache_min_age_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub actor_cache_ttl_secs: u64,
    pub feed_page_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            username: "alice".to_string(),
            domain: "localhost".to_string(),
            public_base_url: String::new(),
            bind: "127.0.0.1:3000".to_string(),
            data_dir: None,
            display_name: None,
            summary: None,
            blocked_domains: Vec::new(),
            blocked_actors: Vec::new(),
            max_date_skew_secs: 3600,
            fetch_timeout_secs: 5,
            delivery_timeout_secs: 10,
            queue_concurrency: 4,
            queue_min_interval_ms: 250,
            cache_max_age_secs: 300,
            cache_min_age_secs: 30,
            cache_sweep_interval_secs: 30,
            actor_cache_ttl_secs: 3600,
            feed_page_size: 20,
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: NodeConfig = serde_json::from_str(&text)
            .with_context(|| format!("parse config: {}", path.display()))?;
        Ok(cfg.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.username = self.username.trim().to_string();
        self.domain = self.domain.trim().to_ascii_lowercase();
        let base = self.public_base_url.trim().trim_end_matches('/').to_string();
        self.public_base_url = if base.is_empty() {
            format!("https://{}", self.domain)
        } else {
            base
        };
        self.queue_concurrency = self.queue_concurrency.max(1);
        self.blocked_domains = clean_list(self.blocked_domains);
        self.blocked_actors = clean_list(self.blocked_actors);
        self
    }

    pub fn base_url(&self) -> String {
        let base = self.public_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            format!("https://{}", self.domain)
        } else {
            base.to_string()
        }
    }

    pub fn actor_url(&self) -> String {
        format!("{}/u/{}", self.base_url(), self.username)
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match self.data_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.max(1))
    }

    pub fn max_date_skew(&self) -> Duration {
        Duration::from_secs(self.max_date_skew_secs)
    }

    pub fn actor_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.actor_cache_ttl_secs)
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("SKIFF_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "skiff", "Skiff")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

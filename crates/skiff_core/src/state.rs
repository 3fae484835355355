/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::account::Account;
use crate::config::NodeConfig;
use crate::delivery_queue::{DeliveryQueue, QueueSettings};
use crate::federation::{Federation, FederationSettings};
use crate::social::Social;
use crate::storage::{CacheSettings, Store};
use crate::transport::{HttpTransport, Transport};
use anyhow::Result;
use std::{path::Path, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::info;

/// Everything an inbound request or a local action needs, cheap to clone.
#[derive(Clone)]
pub struct CoreState {
    pub cfg: Arc<NodeConfig>,
    pub account: Arc<Account>,
    pub store: Arc<Store>,
    pub social: Social,
    pub federation: Federation,
    pub queue: DeliveryQueue,
}

impl CoreState {
    /// Loads (or creates) the account, rebuilds the index from disk and starts the background workers.
    pub async fn open(cfg: NodeConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let data_dir = cfg.data_dir()?;
        let account = {
            let dir = data_dir.clone();
            let cfg = cfg.clone();
            tokio::task::spawn_blocking(move || Account::load_or_create(dir, &cfg)).await??
        };
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
        let state = Self::assemble(cfg, account, &data_dir, transport, shutdown)?;
        let indexed = state.store.build_index().await?;
        info!(
            "skiff core ready: actor={} data_dir={} indexed={indexed}",
            state.account.id(),
            data_dir.display()
        );
        Ok(state)
    }

    /// Wires the components around an existing account and transport. Does not scan storage.
    pub fn assemble(
        cfg: NodeConfig,
        account: Account,
        data_dir: &Path,
        transport: Arc<dyn Transport>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let store = Arc::new(Store::open(
            data_dir,
            CacheSettings {
                max_age: Duration::from_secs(cfg.cache_max_age_secs),
                min_age: Duration::from_secs(cfg.cache_min_age_secs),
            },
        )?);
        store.start_cache_sweeper(Duration::from_secs(cfg.cache_sweep_interval_secs), shutdown.clone());

        let queue = DeliveryQueue::start(
            QueueSettings {
                concurrency: cfg.queue_concurrency.max(1),
                min_interval: Duration::from_millis(cfg.queue_min_interval_ms),
            },
            shutdown,
        );
        let social = Social::new(store.clone());
        let federation = Federation::new(
            transport,
            store.clone(),
            social.clone(),
            queue.clone(),
            FederationSettings {
                fetch_timeout: cfg.fetch_timeout(),
                delivery_timeout: cfg.delivery_timeout(),
                actor_cache_ttl: cfg.actor_cache_ttl(),
            },
        );

        Ok(Self {
            cfg: Arc::new(cfg),
            account: Arc::new(account),
            store,
            social,
            federation,
            queue,
        })
    }
}

/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch, Notify, Semaphore},
    time::Instant,
};
use tracing::{debug, info, warn};

/// A deferred send. It runs on the queue's worker, so anything time-sensitive
/// (signature, `Date`) is computed when the request actually leaves.
pub type DeliveryTask = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub concurrency: usize,
    /// Minimum spacing between two task starts.
    pub min_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            min_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub in_flight: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    in_flight: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Best-effort outbound dispatcher: bounded concurrency, no persistence, no retry.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<DeliveryTask>,
    counters: Arc<Counters>,
    idle: Arc<Notify>,
}

impl DeliveryQueue {
    pub fn start(settings: QueueSettings, shutdown: watch::Receiver<bool>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            counters: Arc::new(Counters::default()),
            idle: Arc::new(Notify::new()),
        };
        let worker = queue.clone();
        tokio::spawn(async move {
            worker.run_loop(settings, rx, shutdown).await;
        });
        queue
    }

    pub fn push<F>(&self, task: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Box::new(task)).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            warn!("delivery queue stopped, dropping task");
            self.idle.notify_waiters();
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.counters.queued.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            delivered: self.counters.delivered.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    fn is_idle(&self) -> bool {
        let s = self.stats();
        s.queued == 0 && s.in_flight == 0
    }

    /// Resolves once nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    async fn run_loop(
        &self,
        settings: QueueSettings,
        mut rx: mpsc::UnboundedReceiver<DeliveryTask>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "delivery queue started (concurrency={}, interval={}ms)",
            settings.concurrency,
            settings.min_interval.as_millis()
        );
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let mut last_start: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let task = tokio::select! {
                t = rx.recv() => match t {
                    Some(t) => t,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if let Some(prev) = last_start {
                tokio::time::sleep_until(prev + settings.min_interval).await;
            }
            let permit = match permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            last_start = Some(Instant::now());

            // Raise in_flight before dropping queued so the task never looks idle.
            self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            let counters = self.counters.clone();
            let idle = self.idle.clone();
            tokio::spawn(async move {
                match task().await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        warn!("delivery failed: {e:#}");
                    }
                }
                drop(permit);
                counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                idle.notify_waiters();
            });
        }

        // Whatever is still queued is dropped; there is no durable backlog.
        let mut dropped = 0u64;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            self.counters.queued.fetch_sub(dropped, Ordering::SeqCst);
            self.counters.failed.fetch_add(dropped, Ordering::SeqCst);
        }
        self.idle.notify_waiters();
        debug!("delivery queue stopped ({dropped} queued tasks dropped)");
    }
}

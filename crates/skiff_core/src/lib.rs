/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod account;
pub mod config;
pub mod delivery_queue;
pub mod federation;
pub mod feed;
pub mod http_sig;
pub mod inbox;
pub mod outbox;
pub mod server;
pub mod social;
pub mod state;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use account::Account;
pub use config::NodeConfig;
pub use state::CoreState;
pub use storage::{IndexEntry, Store, StoreError};

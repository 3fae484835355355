/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::account::Account;
use crate::http_sig::sign_request;
use anyhow::{Context, Result};
use async_trait::async_trait;
use http::{Method, Uri};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use skiff_protocol::{ACTIVITY_ACCEPT, ACTIVITY_JSON};
use std::time::Duration;
use thiserror::Error;

/// A remote endpoint answered with a non-success status.
#[derive(Debug, Error)]
#[error("{method} {url}: status {status}")]
pub struct StatusError {
    pub method: &'static str,
    pub url: String,
    pub status: u16,
}

/// Status code carried by a transport error, if the remote answered at all.
pub fn error_status(e: &anyhow::Error) -> Option<u16> {
    e.downcast_ref::<StatusError>().map(|s| s.status)
}

/// Outbound HTTP used by the federation client. Signing happens inside the
/// call so every request leaves with a fresh `Date` and signature.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str, signer: Option<&Account>, timeout: Duration) -> Result<Value>;

    async fn post_json(&self, url: &str, signer: &Account, body: &[u8], timeout: Duration) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("skiff/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str, signer: Option<&Account>, timeout: Duration) -> Result<Value> {
        let mut req = self.client.get(url).header(ACCEPT, ACTIVITY_ACCEPT).timeout(timeout);
        if let Some(account) = signer {
            let uri: Uri = url.parse().with_context(|| format!("parse url: {url}"))?;
            let signed = sign_request(&Method::GET, &uri, &account.private_key, &account.key_id(), None)?;
            for (k, v) in signed.headers() {
                req = req.header(k, v);
            }
        }

        let resp = req.send().await.with_context(|| format!("fetch {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StatusError {
                method: "GET",
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        let text = resp.text().await.with_context(|| format!("read body: {url}"))?;
        serde_json::from_str(&text).with_context(|| format!("parse json from {url}"))
    }

    async fn post_json(&self, url: &str, signer: &Account, body: &[u8], timeout: Duration) -> Result<()> {
        let uri: Uri = url.parse().with_context(|| format!("parse inbox url: {url}"))?;
        let signed = sign_request(&Method::POST, &uri, &signer.private_key, &signer.key_id(), Some(body))?;

        let mut req = self
            .client
            .post(url)
            .header(ACCEPT, ACTIVITY_JSON)
            .header(CONTENT_TYPE, ACTIVITY_JSON)
            .timeout(timeout);
        for (k, v) in signed.headers() {
            req = req.header(k, v);
        }

        let resp = req
            .body(body.to_vec())
            .send()
            .await
            .with_context(|| format!("deliver to {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StatusError {
                method: "POST",
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(())
    }
}

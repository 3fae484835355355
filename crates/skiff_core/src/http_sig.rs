/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::{header::HeaderName, HeaderMap, HeaderValue, Method, Uri};
use httpdate::parse_http_date;
use rsa::{
    pkcs1v15::{SigningKey, VerifyingKey},
    pkcs8::DecodePublicKey,
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use skiff_protocol::Actor;
use std::{collections::HashMap, time::{Duration, SystemTime}};
use tracing::debug;

const REQUEST_TARGET: &str = "(request-target)";

/// Header values produced by [`sign_request`], ready to be attached to the outgoing request.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub host: String,
    pub date: String,
    pub digest: Option<String>,
    pub signature: String,
}

impl SignedRequest {
    pub fn headers(&self) -> Vec<(&'static str, &str)> {
        let mut out = vec![("Host", self.host.as_str()), ("Date", self.date.as_str())];
        if let Some(d) = self.digest.as_deref() {
            out.push(("Digest", d));
        }
        out.push(("Signature", self.signature.as_str()));
        out
    }

    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        for (name, value) in self.headers() {
            headers.insert(name, HeaderValue::from_str(value).with_context(|| format!("set {name}"))?);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SignatureParams {
    pub key_id: String,
    pub headers: Vec<String>,
    pub signature: Vec<u8>,
}

/// `SHA-256=<base64>` over the exact serialized body.
pub fn body_digest(body: &[u8]) -> String {
    format!("SHA-256={}", B64.encode(Sha256::digest(body)))
}

/// Actor URI owning a key id (`https://host/u/name#main-key` -> `https://host/u/name`).
pub fn key_owner(key_id: &str) -> &str {
    key_id.split_once('#').map(|(a, _)| a).unwrap_or(key_id)
}

pub fn sign_request(
    method: &Method,
    uri: &Uri,
    private_key: &RsaPrivateKey,
    key_id: &str,
    body: Option<&[u8]>,
) -> Result<SignedRequest> {
    sign_request_at(method, uri, private_key, key_id, body, SystemTime::now())
}

pub fn sign_request_at(
    method: &Method,
    uri: &Uri,
    private_key: &RsaPrivateKey,
    key_id: &str,
    body: Option<&[u8]>,
    now: SystemTime,
) -> Result<SignedRequest> {
    let host = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .ok_or_else(|| anyhow!("url has no host: {uri}"))?;
    let date = httpdate::fmt_http_date(now);
    let digest = body.map(body_digest);

    let mut headers = HeaderMap::new();
    headers.insert("host", host.parse().context("set host")?);
    headers.insert("date", date.parse().context("set date")?);
    let mut signed: Vec<String> = vec![REQUEST_TARGET.into(), "host".into(), "date".into()];
    if let Some(d) = digest.as_deref() {
        headers.insert("digest", d.parse().context("set digest")?);
        signed.push("digest".into());
    }

    let signing_string = build_signing_string(method, uri, &headers, &signed)?;
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::rngs::OsRng;
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let sig_b64 = B64.encode(signature.to_bytes());

    let headers_list = signed.join(" ");
    Ok(SignedRequest {
        host,
        date,
        digest,
        signature: format!("keyId=\"{key_id}\",headers=\"{headers_list}\",signature=\"{sig_b64}\""),
    })
}

pub fn parse_signature_header(value: &str) -> Result<SignatureParams> {
    // Signature: keyId="...",headers="(request-target) host date",signature="base64..."
    let mut map = HashMap::<String, String>::new();
    for part in value.split(',') {
        let part = part.trim();
        // base64 may itself end in '=', so split on the first one only.
        let Some((k, v)) = part.split_once('=') else { continue };
        let v = v.trim().trim_matches('"');
        map.insert(k.trim().to_string(), v.to_string());
    }

    let key_id = map
        .get("keyId")
        .cloned()
        .ok_or_else(|| anyhow!("Signature missing keyId"))?;
    let headers = map
        .get("headers")
        .cloned()
        .unwrap_or_else(|| "date".to_string());
    let signature_b64 = map
        .get("signature")
        .cloned()
        .ok_or_else(|| anyhow!("Signature missing signature"))?;

    let signature = B64
        .decode(signature_b64.as_bytes())
        .context("decode signature")?;

    Ok(SignatureParams {
        key_id,
        headers: headers
            .split_whitespace()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        signature,
    })
}

pub fn build_signing_string(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
) -> Result<String> {
    let mut lines = Vec::with_capacity(signed_headers.len());
    for name in signed_headers {
        if name == REQUEST_TARGET {
            let path = uri.path();
            let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
            lines.push(format!(
                "{REQUEST_TARGET}: {} {path}{query}",
                method.as_str().to_ascii_lowercase()
            ));
            continue;
        }

        let header_name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("bad signed header name: {name}"))?;
        let value = headers
            .get(&header_name)
            .ok_or_else(|| anyhow!("missing signed header: {name}"))?
            .to_str()
            .with_context(|| format!("invalid header value for {name}"))?;
        lines.push(format!("{name}: {}", value.trim()));
    }
    Ok(lines.join("\n"))
}

/// Checks the `Signature` header of an inbound request against `actor`'s key.
///
/// `uri` must be the URI the request was actually delivered to. Any parse or
/// crypto failure, or a missing actor/key, yields `false`.
pub fn verify_request(actor: Option<&Actor>, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
    match try_verify(actor, method, uri, headers) {
        Ok(()) => true,
        Err(e) => {
            debug!("signature rejected: {e:#}");
            false
        }
    }
}

fn try_verify(actor: Option<&Actor>, method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<()> {
    let actor = actor.ok_or_else(|| anyhow!("actor not resolved"))?;
    let pem = actor
        .public_key_pem()
        .ok_or_else(|| anyhow!("actor has no public key: {}", actor.id))?;
    let value = headers
        .get("signature")
        .ok_or_else(|| anyhow!("missing Signature header"))?
        .to_str()
        .context("Signature header not utf8")?;
    let params = parse_signature_header(value)?;
    if !params.headers.iter().any(|h| h == REQUEST_TARGET) {
        return Err(anyhow!("signature does not cover (request-target)"));
    }
    let signing_string = build_signing_string(method, uri, headers, &params.headers)?;
    verify_signature_rsa_sha256(pem, &signing_string, &params.signature)
}

pub fn verify_signature_rsa_sha256(public_key_pem: &str, signing_string: &str, signature: &[u8]) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .context("parse public key pem")?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .context("invalid rsa signature bytes")?;
    verifying_key
        .verify(signing_string.as_bytes(), &sig)
        .context("signature verify failed")?;
    Ok(())
}

pub fn verify_digest(headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let Some(digest) = headers.get("digest") else {
        return Ok(());
    };
    let digest = digest.to_str().context("Digest header not utf8")?;
    // Digest: SHA-256=base64
    let Some((alg, value)) = digest.split_once('=') else {
        return Err(anyhow!("invalid Digest header"));
    };
    if !alg.trim().eq_ignore_ascii_case("SHA-256") {
        return Err(anyhow!("unsupported digest alg: {alg}"));
    }
    let expected = B64.decode(value.trim().as_bytes()).context("decode digest")?;
    if expected.as_slice() != Sha256::digest(body).as_slice() {
        return Err(anyhow!("digest mismatch"));
    }
    Ok(())
}

pub fn verify_date(headers: &HeaderMap, max_skew: Duration) -> Result<()> {
    let date = headers
        .get("date")
        .ok_or_else(|| anyhow!("missing Date header"))?
        .to_str()
        .context("Date header not utf8")?;
    let ts = parse_http_date(date).context("parse Date header")?;
    let now = SystemTime::now();
    let diff = now
        .duration_since(ts)
        .or_else(|_| ts.duration_since(now))
        .unwrap_or_default();
    if diff > max_skew {
        return Err(anyhow!("Date skew too large: {}s", diff.as_secs()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{remote_actor, test_key};

    const KEY_ID: &str = "https://remote.example/users/bob#main-key";

    fn signed_headers(method: &Method, uri: &Uri, body: Option<&[u8]>) -> HeaderMap {
        let signed = sign_request(method, uri, test_key(), KEY_ID, body).unwrap();
        let mut headers = HeaderMap::new();
        signed.apply(&mut headers).unwrap();
        headers
    }

    #[test]
    fn header_has_expected_shape() {
        let uri: Uri = "https://skiff.example/u/alice/inbox".parse().unwrap();
        let signed = sign_request(&Method::POST, &uri, test_key(), KEY_ID, Some(b"{}")).unwrap();
        assert!(signed.signature.starts_with(&format!("keyId=\"{KEY_ID}\",headers=\"(request-target) host date digest\",signature=\"")));
        assert_eq!(signed.host, "skiff.example");
        assert_eq!(signed.digest.as_deref(), Some(body_digest(b"{}").as_str()));

        let get = sign_request(&Method::GET, &uri, test_key(), KEY_ID, None).unwrap();
        assert!(get.signature.contains("headers=\"(request-target) host date\""));
        assert!(get.digest.is_none());
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let actor = remote_actor("https://remote.example/users/bob");
        let uri: Uri = "https://skiff.example/u/alice/inbox?x=1".parse().unwrap();
        let headers = signed_headers(&Method::POST, &uri, Some(b"{\"a\":1}"));
        assert!(verify_request(Some(&actor), &Method::POST, &uri, &headers));
        assert!(verify_digest(&headers, b"{\"a\":1}").is_ok());
    }

    #[test]
    fn mutating_any_signed_field_fails() {
        let actor = remote_actor("https://remote.example/users/bob");
        let uri: Uri = "https://skiff.example/u/alice/inbox".parse().unwrap();
        let headers = signed_headers(&Method::POST, &uri, Some(b"{}"));

        let mut date = headers.clone();
        date.insert("date", "Mon, 01 Jan 2001 00:00:00 GMT".parse().unwrap());
        assert!(!verify_request(Some(&actor), &Method::POST, &uri, &date));

        let other: Uri = "https://skiff.example/u/alice/outbox".parse().unwrap();
        assert!(!verify_request(Some(&actor), &Method::POST, &other, &headers));

        let mut digest = headers.clone();
        digest.insert("digest", body_digest(b"{\"tampered\":true}").parse().unwrap());
        assert!(!verify_request(Some(&actor), &Method::POST, &uri, &digest));

        assert!(!verify_request(Some(&actor), &Method::GET, &uri, &headers));
    }

    #[test]
    fn digest_mismatch_is_detected() {
        let uri: Uri = "https://skiff.example/u/alice/inbox".parse().unwrap();
        let headers = signed_headers(&Method::POST, &uri, Some(b"{}"));
        assert!(verify_digest(&headers, b"{\"other\":1}").is_err());
        assert!(verify_digest(&HeaderMap::new(), b"anything").is_ok());
    }

    #[test]
    fn failures_are_closed_not_panics() {
        let actor = remote_actor("https://remote.example/users/bob");
        let uri: Uri = "https://skiff.example/u/alice/inbox".parse().unwrap();
        let headers = signed_headers(&Method::POST, &uri, None);

        assert!(!verify_request(None, &Method::POST, &uri, &headers));

        let mut keyless = actor.clone();
        keyless.public_key = None;
        assert!(!verify_request(Some(&keyless), &Method::POST, &uri, &headers));

        for garbage in ["", "keyId=", "keyId=\"k\",signature=\"!!!\"", "headers=\"date\""] {
            let mut h = headers.clone();
            h.insert("signature", garbage.parse().unwrap());
            assert!(!verify_request(Some(&actor), &Method::POST, &uri, &h));
        }

        let mut missing = headers.clone();
        missing.remove("signature");
        assert!(!verify_request(Some(&actor), &Method::POST, &uri, &missing));
    }

    #[test]
    fn signature_must_cover_request_target() {
        let actor = remote_actor("https://remote.example/users/bob");
        let uri: Uri = "https://skiff.example/u/alice/inbox".parse().unwrap();
        let mut headers = signed_headers(&Method::POST, &uri, None);
        let sig = headers.get("signature").unwrap().to_str().unwrap().replace("(request-target) ", "");
        headers.insert("signature", sig.parse().unwrap());
        assert!(!verify_request(Some(&actor), &Method::POST, &uri, &headers));
    }

    #[test]
    fn stale_date_is_rejected() {
        let uri: Uri = "https://skiff.example/u/alice/inbox".parse().unwrap();
        let old = SystemTime::now() - Duration::from_secs(7200);
        let signed = sign_request_at(&Method::POST, &uri, test_key(), KEY_ID, None, old).unwrap();
        let mut headers = HeaderMap::new();
        signed.apply(&mut headers).unwrap();
        assert!(verify_date(&headers, Duration::from_secs(3600)).is_err());
        assert!(verify_date(&headers, Duration::from_secs(3 * 3600)).is_ok());
    }

    #[test]
    fn key_owner_strips_fragment() {
        assert_eq!(key_owner(KEY_ID), "https://remote.example/users/bob");
        assert_eq!(key_owner("https://a.example/u/x"), "https://a.example/u/x");
    }
}

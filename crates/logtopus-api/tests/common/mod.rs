//! Shared helpers for API integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey, KeypairBytes};
use serde_json::Value;
use tower::ServiceExt;

use logtopus_api::audit::{AuditEmitter, RecordingAuditSink};
use logtopus_api::auth::TokenAuthority;
use logtopus_api::server::ServerBuilder;
use logtopus_core::store::MemoryPointStore;

pub const USER: &str = "johnnyHotbody";
pub const PASS: &str = "me-llamo-johnny";

/// PKCS#8 private and SPKI public PEMs for a deterministic Ed25519 key.
pub fn key_pair(seed: u8) -> Result<(String, String)> {
    let secret = [seed; 32];
    let private_pem = KeypairBytes {
        secret_key: secret,
        public_key: None,
    }
    .to_pkcs8_pem(LineEnding::LF)
    .context("encode private key")?
    .to_string();
    let public_pem = SigningKey::from_bytes(&secret)
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .context("encode public key")?;
    Ok((private_pem, public_pem))
}

pub fn authority(seed: u8) -> Result<Arc<TokenAuthority>> {
    let (private_pem, public_pem) = key_pair(seed)?;
    let authority = TokenAuthority::from_pem(
        private_pem.as_bytes(),
        public_pem.as_bytes(),
        Duration::from_secs(30 * 60),
    )
    .context("build token authority")?;
    Ok(Arc::new(authority))
}

/// A router over `store` with a working authority and a recording audit sink.
pub struct TestApp {
    pub router: Router,
    pub store: MemoryPointStore,
    pub authority: Arc<TokenAuthority>,
    pub audit: Arc<RecordingAuditSink>,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_store(MemoryPointStore::new())
    }

    pub fn with_store(store: MemoryPointStore) -> Result<Self> {
        let authority = authority(7)?;
        let audit = Arc::new(RecordingAuditSink::new());
        let router = ServerBuilder::new()
            .store(Arc::new(store.clone()))
            .authority(Arc::clone(&authority))
            .audit(AuditEmitter::new(audit.clone()))
            .build()
            .test_router();
        Ok(Self {
            router,
            store,
            authority,
            audit,
        })
    }

    pub fn token(&self) -> Result<String> {
        self.authority.issue_token(USER).context("issue token")
    }

    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| match err {})?;
        Ok(response)
    }
}

pub fn post_json(uri: &str, token: Option<&str>, body: &str) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Token", token);
    }
    builder
        .body(Body::from(body.to_string()))
        .context("build request")
}

pub async fn body_bytes(response: Response<Body>) -> Result<Vec<u8>> {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .context("read response body")?;
    Ok(bytes.to_vec())
}

pub async fn body_json(response: Response<Body>) -> Result<Value> {
    let bytes = body_bytes(response).await?;
    serde_json::from_slice(&bytes).context("parse JSON body")
}

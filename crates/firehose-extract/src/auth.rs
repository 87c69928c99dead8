//! Bearer credentials for the Firehose channel.
//!
//! Two [`Authenticator`]s are provided:
//!
//! - [`StaticToken`] - a token supplied as-is (for example `FIREHOSE_TOKEN`).
//! - [`JwtAuthenticator`] - exchanges an API key for a JWT at an auth
//!   endpoint, optionally caching the JWT on disk for a fixed TTL.
//!
//! Authentication happens once, before any stream is opened. Every failure
//! maps to [`Error::Authentication`].

use chrono::Utc;
use core::time::Duration;
use firehose_extract_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How long a fetched JWT is reused.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[tonic::async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns a bearer token for the RPC channel.
    async fn get_token(&self) -> Result<String>;
}

/// A pre-issued token.
#[derive(Clone, Debug)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[tonic::async_trait]
impl Authenticator for StaticToken {
    async fn get_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    api_key: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Serialize, Deserialize)]
struct CachedToken {
    endpoint: String,
    token: String,
    /// Unix seconds.
    fetched_at: i64,
}

/// Exchanges an API key for a JWT by POSTing `{"api_key": ...}` to the auth
/// endpoint and reading `{"token": ...}` back.
pub struct JwtAuthenticator {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    cache: Option<(PathBuf, Duration)>,
}

impl JwtAuthenticator {
    /// `timeout` bounds the whole HTTP exchange.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Authentication {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
            cache: None,
        })
    }

    /// Reuses a token stored at `path` while it is younger than `ttl`.
    #[must_use]
    pub fn with_cache(mut self, path: impl Into<PathBuf>, ttl: Duration) -> Self {
        self.cache = Some((path.into(), ttl));
        self
    }

    async fn fetch(&self) -> Result<String> {
        let auth_error = |reason: String| Error::Authentication { reason };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&TokenRequest {
                api_key: &self.api_key,
            })
            .send()
            .await
            .map_err(|e| auth_error(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(format!("Could not load JWT token ({status}): {body}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(format!("unexpected auth response: {e}")))?;

        if body.token.is_empty() {
            return Err(auth_error("auth endpoint returned an empty token".to_string()));
        }
        Ok(body.token)
    }

    async fn load_cached(&self, path: &Path, ttl: Duration) -> Option<String> {
        let raw = tokio::fs::read_to_string(path).await.ok()?;
        let cached: CachedToken = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Ignoring unreadable token cache {}: {e}", path.display());
                return None;
            }
        };

        let age = Utc::now().timestamp().saturating_sub(cached.fetched_at);
        let fresh = u64::try_from(age).is_ok_and(|age| age < ttl.as_secs());
        (fresh && cached.endpoint == self.endpoint && !cached.token.is_empty())
            .then_some(cached.token)
    }

    async fn store_cached(&self, path: &Path, token: &str) {
        let cached = CachedToken {
            endpoint: self.endpoint.clone(),
            token: token.to_string(),
            fetched_at: Utc::now().timestamp(),
        };

        let write = async {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec(&cached).map_err(std::io::Error::other)?;
            tokio::fs::write(path, json).await
        };

        if let Err(e) = write.await {
            tracing::warn!("Could not cache JWT token at {}: {e}", path.display());
        }
    }
}

#[tonic::async_trait]
impl Authenticator for JwtAuthenticator {
    async fn get_token(&self) -> Result<String> {
        tracing::info!("Getting JWT token...");

        if let Some((path, ttl)) = &self.cache {
            if let Some(token) = self.load_cached(path, *ttl).await {
                tracing::info!("Got JWT token (cached)");
                return Ok(token);
            }
        }

        let token = self.fetch().await?;
        if let Some((path, _)) = &self.cache {
            self.store_cached(path, &token).await;
        }

        tracing::info!("Got JWT token (new)");
        Ok(token)
    }
}

//! Spotify credentials
//!
//! Tokens are opaque to the agent. `CredentialCache` keeps the current token
//! and coalesces concurrent refreshes into a single call.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tune_config::Config;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no Spotify credential available; log in first")]
    Unauthenticated,

    #[error("Spotify token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Bearer token plus the account it belongs to
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub secret: String,
    pub user_id: Option<String>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            user_id,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, CredentialError>;

    /// Obtain a new token after the current one was rejected
    async fn refresh(&self) -> Result<AccessToken, CredentialError> {
        Err(CredentialError::Unauthenticated)
    }
}

/// Fixed token from config or environment
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<AccessToken>,
}

impl StaticCredentials {
    pub fn new(secret: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            token: Some(AccessToken::new(secret, user_id)),
        }
    }

    /// No credential at all; every request fails with an auth error
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            token: config
                .spotify_access_token()
                .map(|secret| AccessToken::new(secret, config.spotify_user_id())),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        self.token.clone().ok_or(CredentialError::Unauthenticated)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Refresh-token grant against the Spotify accounts service
pub struct SpotifyRefreshCredentials {
    http: reqwest::Client,
    accounts_base: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    user_id: Option<String>,
    initial: Option<String>,
}

impl SpotifyRefreshCredentials {
    pub fn new(
        accounts_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            accounts_base: accounts_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            user_id: None,
            initial: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Token to use before the first refresh
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.initial = token;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let spotify = &config.spotify;
        Self::new(
            &spotify.accounts_base,
            &spotify.client_id,
            &spotify.client_secret,
            &spotify.refresh_token,
        )
        .with_user_id(config.spotify_user_id())
        .with_access_token(config.spotify_access_token())
    }
}

#[async_trait]
impl CredentialProvider for SpotifyRefreshCredentials {
    async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        match &self.initial {
            Some(secret) => Ok(AccessToken::new(secret, self.user_id.clone())),
            None => self.refresh().await,
        }
    }

    async fn refresh(&self) -> Result<AccessToken, CredentialError> {
        if self.refresh_token.is_empty() {
            return Err(CredentialError::Unauthenticated);
        }

        let url = format!("{}/api/token", self.accounts_base);
        debug!("refreshing Spotify token via {}", url);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("token refresh rejected with {}", status);
            return Err(CredentialError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;
        info!("Spotify access token refreshed");
        Ok(AccessToken::new(token.access_token, self.user_id.clone()))
    }
}

/// Current token with single-flight refresh
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    state: Mutex<CacheState>,
    refreshes: AtomicUsize,
}

#[derive(Default)]
struct CacheState {
    current: Option<AccessToken>,
    /// Stale secret and error of the last failed refresh
    failed: Option<(String, CredentialError)>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(CacheState::default()),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub async fn token(&self) -> Result<AccessToken, CredentialError> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.current.as_ref() {
            return Ok(token.clone());
        }
        let token = self.provider.access_token().await?;
        state.current = Some(token.clone());
        Ok(token)
    }

    /// Replace `stale` with a fresh token. Callers that raced on the same
    /// stale token wait for the one refresh and share its result, failed
    /// or not.
    pub async fn refresh(&self, stale: &AccessToken) -> Result<AccessToken, CredentialError> {
        let seen = self.refreshes.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(token) = state.current.as_ref() {
            if token.secret != stale.secret {
                return Ok(token.clone());
            }
        }
        if self.refreshes.load(Ordering::SeqCst) != seen {
            if let Some((secret, err)) = state.failed.as_ref() {
                if *secret == stale.secret {
                    debug!("sharing result of the refresh that just failed");
                    return Err(err.clone());
                }
            }
        }

        let result = self.provider.refresh().await;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(token) => {
                state.current = Some(token.clone());
                state.failed = None;
                Ok(token)
            }
            Err(e) => {
                state.current = None;
                state.failed = Some((stale.secret.clone(), e.clone()));
                Err(e)
            }
        }
    }

    /// Number of refreshes actually sent to the provider
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

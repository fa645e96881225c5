//! Spotify Web API client and playlist tools

use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::credentials::{AccessToken, CredentialCache, CredentialError};
use crate::tools::ToolError;

pub mod tools;

pub use tools::{
    register_spotify_tools, AddTracksToPlaylist, CreatePlaylist, PlaylistDescriptor, SearchTracks,
    TrackDescriptor,
};

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl From<CredentialError> for ToolError {
    fn from(err: CredentialError) -> Self {
        ToolError::Auth(err.to_string())
    }
}

/// Bearer-authenticated JSON client
pub struct SpotifyClient {
    http: reqwest::Client,
    api_base: String,
    credentials: Arc<CredentialCache>,
}

impl SpotifyClient {
    pub fn new(api_base: impl Into<String>, credentials: Arc<CredentialCache>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Current token, failing before any request when none is available
    pub async fn token(&self) -> Result<AccessToken, ToolError> {
        Ok(self.credentials.token().await?)
    }

    pub async fn get(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Value, ToolError> {
        let url = self.endpoint(segments, query)?;
        self.send(Method::GET, url, None).await
    }

    pub async fn post(&self, segments: &[&str], body: &Value) -> Result<Value, ToolError> {
        let url = self.endpoint(segments, &[])?;
        self.send(Method::POST, url, Some(body)).await
    }

    /// Build `{api_base}/seg/seg?query`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ToolError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ToolError::failed(format!("invalid Spotify API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ToolError::failed("Spotify API base cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Value, ToolError> {
        let token = self.token().await?;
        let response = self.dispatch(&method, &url, body, &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::decode(response).await;
        }

        warn!("Spotify rejected the access token, refreshing");
        let fresh = self.credentials.refresh(&token).await?;
        let response = self.dispatch(&method, &url, body, &fresh).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ToolError::Auth(
                "Spotify rejected the refreshed access token".to_string(),
            ));
        }
        Self::decode(response).await
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: &AccessToken,
    ) -> Result<reqwest::Response, ToolError> {
        debug!("{} {}", method, url.path());
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(&token.secret);
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            if e.is_connect() {
                ToolError::NotSent(e.to_string())
            } else {
                ToolError::failed(e.to_string())
            }
        })
    }

    async fn decode(response: reqwest::Response) -> Result<Value, ToolError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ToolError::RateLimited { retry_after });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?;

        if status.is_server_error() {
            return Err(ToolError::Server {
                status: status.as_u16(),
                detail: error_message(&text, status),
            });
        }
        if !status.is_success() {
            return Err(ToolError::Failed {
                status: Some(status.as_u16()),
                detail: error_message(&text, status),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ToolError::failed(format!("malformed Spotify response: {e}")))
    }
}

fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;

    fn client(base: &str) -> SpotifyClient {
        let creds = Arc::new(CredentialCache::new(Arc::new(StaticCredentials::new(
            "token", None,
        ))));
        SpotifyClient::new(base, creds)
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = client("https://api.spotify.com/v1/");
        let url = client
            .endpoint(&["playlists", "a/b c", "tracks"], &[])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.spotify.com/v1/playlists/a%2Fb%20c/tracks"
        );
    }

    #[test]
    fn test_endpoint_query() {
        let client = client("https://api.spotify.com/v1");
        let url = client
            .endpoint(
                &["search"],
                &[("q", "miles davis".to_string()), ("type", "track".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.spotify.com/v1/search?q=miles+davis&type=track"
        );
    }

    #[test]
    fn test_error_message_prefers_api_body() {
        let body = r#"{"error":{"status":404,"message":"Invalid playlist Id"}}"#;
        assert_eq!(
            error_message(body, StatusCode::NOT_FOUND),
            "Invalid playlist Id"
        );
        assert_eq!(
            error_message("<html>", StatusCode::BAD_GATEWAY),
            "Bad Gateway"
        );
    }
}

// Remote game-state service client.
//
// The service is an HTTP endpoint that takes a game ID and returns a JSON
// snapshot shaped like `GameState`. Any non-2xx status, transport failure,
// or unparseable body is a `FetchError`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::game::GameState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const GAME_STATE_PATH: &str = "game-state";
const GAME_ID_PARAM: &str = "gameId";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Why a snapshot could not be fetched. `Clone` so that every caller
/// coalesced onto one in-flight fetch receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("service returned status {0}")]
    Status(u16),

    #[error("malformed game-state payload: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Anything that can produce a game-state snapshot for a game ID.
#[async_trait]
pub trait GameStateSource: Send + Sync {
    async fn fetch_game_state(&self, game_id: &str) -> Result<GameState, FetchError>;
}

// ---------------------------------------------------------------------------
// HttpGameStateSource
// ---------------------------------------------------------------------------

/// reqwest-backed client for the remote game-state service.
pub struct HttpGameStateSource {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpGameStateSource {
    /// Create a client for the service rooted at `base_url`, giving up on
    /// any single request after `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_token: Option<String>,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    /// Build a client from the application config.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            config.remote.base_url.clone(),
            Duration::from_secs(config.remote.request_timeout_secs),
            config.credentials.api_token.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/{GAME_STATE_PATH}", self.base_url)
    }
}

#[async_trait]
impl GameStateSource for HttpGameStateSource {
    async fn fetch_game_state(&self, game_id: &str) -> Result<GameState, FetchError> {
        let mut request = self
            .http
            .get(self.endpoint())
            .query(&[(GAME_ID_PARAM, game_id)])
            .header("accept", "application/json");
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!(game_id, "game-state request failed: {e}");
            FetchError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(game_id, %status, "game-state service returned error status");
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response body: {e}")))?;
        debug!(game_id, bytes = body.len(), "received game-state snapshot");

        parse_snapshot(&body)
    }
}

// ---------------------------------------------------------------------------
// JSON parsing helpers
// ---------------------------------------------------------------------------

/// Parse a response body into a [`GameState`].
pub(crate) fn parse_snapshot(body: &str) -> Result<GameState, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

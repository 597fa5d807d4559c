use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use ingest_models::{OAuthProvider, OAuthToken};

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token refresh rejected with {status}: {body}")]
    Rejected { status: reqwest::StatusCode, body: String },

    #[error("Refresh returned an unusable token")]
    InvalidToken,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    data: OAuthToken,
}

/// Client of the OAuth gateway's token refresh endpoint
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: String,
}

impl OAuthClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn refresh(&self, provider: OAuthProvider, token: &OAuthToken) -> Result<OAuthToken, OAuthError> {
        let url = format!("{}/api/oauth/{}/refresh_token", self.base_url, provider);
        debug!("Refreshing {} token via {}", provider, url);

        let response = self.http.post(&url).json(token).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Rejected { status, body });
        }

        let refreshed = response.json::<RefreshResponse>().await?.data;
        if refreshed.access_token.is_empty() {
            return Err(OAuthError::InvalidToken);
        }
        info!("🔑 Refreshed {} token", provider);
        Ok(refreshed)
    }
}

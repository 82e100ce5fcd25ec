//! Provider credentials.
//!
//! API-key providers use a fixed header. OAuth-style providers derive a
//! short-lived access token from a refresh token; the token is renewed when
//! it expires within the next two minutes. Refresh failure surfaces as an
//! auth error and is never retried.

use crate::llm::LlmError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

/// Renew when the access token expires within this window.
const REFRESH_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone)]
pub enum Credentials {
    ApiKey {
        key: String,
        /// Header the key is sent under, e.g. `x-api-key` or `Authorization`.
        header: String,
    },
    OAuth(OAuthToken),
}

#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_url: String,
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>, header: impl Into<String>) -> Self {
        Credentials::ApiKey {
            key: key.into(),
            header: header.into(),
        }
    }

    /// Header name and value to attach to the next request, refreshing an
    /// OAuth access token first when it is about to expire.
    pub async fn auth_header(
        &mut self,
        http: &reqwest::Client,
    ) -> Result<(String, String), LlmError> {
        match self {
            Credentials::ApiKey { key, header } => Ok((header.clone(), key.clone())),
            Credentials::OAuth(token) => {
                let deadline = Utc::now() + Duration::seconds(REFRESH_WINDOW_SECS);
                if token.expires_at <= deadline {
                    debug!("Access token expiring, refreshing");
                    refresh(token, http).await?;
                }
                Ok((
                    "Authorization".to_string(),
                    format!("Bearer {}", token.access_token),
                ))
            }
        }
    }
}

async fn refresh(token: &mut OAuthToken, http: &reqwest::Client) -> Result<(), LlmError> {
    let response = http
        .post(&token.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", token.refresh_token.as_str()),
            ("client_id", token.client_id.as_str()),
        ])
        .send()
        .await
        .map_err(|e| {
            warn!("Token refresh request failed: {}", e);
            LlmError::AuthRequired(format!("Token refresh failed: {}", e))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        warn!("Token refresh rejected with {}", status);
        return Err(LlmError::AuthRequired(format!(
            "Token refresh rejected: {}",
            status
        )));
    }

    let refreshed: RefreshResponse = response
        .json()
        .await
        .map_err(|e| LlmError::AuthRequired(format!("Malformed refresh response: {}", e)))?;

    token.access_token = refreshed.access_token;
    if let Some(new_refresh) = refreshed.refresh_token {
        token.refresh_token = new_refresh;
    }
    token.expires_at = Utc::now() + Duration::seconds(refreshed.expires_in);
    debug!("Access token refreshed, valid until {}", token.expires_at);
    Ok(())
}

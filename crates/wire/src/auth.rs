//! Token auth for the stream. The operator holds a long-lived base token and
//! exchanges it for short-lived JWTs; a refresh happens whenever the cached
//! JWT's `exp` claim is within a small slack of now.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::{ServiceEndpoint, WireError};

const REFRESH_SLACK_SECS: i64 = 4;
const REFRESH_TIMEOUT: Duration = Duration::from_secs(60);
const REFRESH_PATH: &str = "/api/auth/jwt/access_token";

/// Produces the `x-osmo-auth` value, refreshing it against the control plane
/// when it nears expiry. Cheap to share; the cached token swaps atomically.
pub struct TokenSource {
    refresh_url: String,
    base_token: String,
    current: ArcSwap<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

impl TokenSource {
    pub fn new(service: &ServiceEndpoint, base_token: String) -> Result<Self, WireError> {
        let http = reqwest::Client::builder()
            .timeout(REFRESH_TIMEOUT)
            .build()
            .map_err(WireError::AuthRefresh)?;
        Ok(Self {
            refresh_url: format!("{}{REFRESH_PATH}", service.http_base()),
            current: ArcSwap::from_pointee(base_token.clone()),
            base_token,
            http,
        })
    }

    /// Current access token; refreshed first when expiring within the slack.
    /// Tokens without a parseable `exp` claim are treated as non-expiring.
    pub async fn access_token(&self) -> Result<String, WireError> {
        let cached = self.current.load_full();
        if !expiring_soon(&cached, chrono::Utc::now().timestamp()) {
            return Ok((*cached).clone());
        }
        let response: RefreshResponse = self
            .http
            .get(&self.refresh_url)
            .query(&[("access_token", self.base_token.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("access token refreshed");
        self.current.store(Arc::new(response.access_token.clone()));
        Ok(response.access_token)
    }
}

fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

fn expiring_soon(token: &str, now: i64) -> bool {
    match jwt_expiry(token) {
        Some(exp) => exp - now <= REFRESH_SLACK_SECS,
        None => false,
    }
}

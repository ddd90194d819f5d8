//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (completion of the consent flow)
//! 2. Token refresh (request-time, driven by `RefreshingTokenSource`)
//!
//! Both operations POST to `TOKEN_ENDPOINT` with different grant types and
//! authenticate with the pooled client id/secret pair.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_ENDPOINT;
use crate::error::{Error, Result};

/// Client id/secret pair of one pooled video credential.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The refresh
/// grant usually omits `refresh_token`; the caller keeps the previous one.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    /// Space-separated scopes actually granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Exchange an authorization code for tokens.
///
/// The verifier proves this process issued the authorization URL; the
/// redirect URI must equal the one the URL carried.
pub async fn exchange_code(
    client: &reqwest::Client,
    app: &AppCredentials,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.expose().as_str()),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(classify_failure(status, body, "token exchange"));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Obtain a fresh access token using a refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    app: &AppCredentials,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.expose().as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(classify_failure(status, body, "token refresh"));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// 401/403, and 400 with `invalid_grant`, mean the grant itself is dead.
fn classify_failure(status: reqwest::StatusCode, body: String, what: &str) -> Error {
    let code = status.as_u16();
    if code == 401 || code == 403 || (code == 400 && body.contains("invalid_grant")) {
        return Error::InvalidCredentials(format!("{what} rejected ({status}): {body}"));
    }
    Error::TokenExchange(format!("{what} returned {status}: {body}"))
}

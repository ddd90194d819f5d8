//! Credential and session management
//!
//! Operations behind the `credentials`, `auth` and `sessions` commands:
//! - add / list / remove pooled credentials
//! - start the consent flow for a user against one video credential
//! - complete it with the callback's state and code, creating a session
//! - list / remove sessions
//!
//! Keys and secrets leave this module only in masked form.

use std::sync::Arc;

use common::unix_millis;
use oauth::{AppCredentials, PENDING_EXCHANGE_TTL, SCOPES, Token};
use quota_pool::quota::VIDEO_DAILY_CEILING;
use quota_pool::{
    Credential, NewCredential, PendingExchange, PoolKind, Session, SessionTokens, Store,
};
use tracing::{info, warn};

use crate::deepl::DeepLProvider;
use crate::error::{Error, Result};

/// Authorization URL issued to a user, with the state token it carries.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Result of a completed consent flow.
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub session: Session,
    /// Where to send the user next
    pub redirect_url: String,
}

pub struct AccountService {
    store: Arc<Store>,
    http: reqwest::Client,
    /// OAuth callback registered with the video platform
    callback_uri: String,
    deepl: Arc<DeepLProvider>,
}

impl AccountService {
    pub fn new(
        store: Arc<Store>,
        http: reqwest::Client,
        callback_uri: impl Into<String>,
        deepl: Arc<DeepLProvider>,
    ) -> Self {
        Self {
            store,
            http,
            callback_uri: callback_uri.into(),
            deepl,
        }
    }

    /// Add an OAuth client of the video platform with a full daily budget.
    pub async fn add_video_credential(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Credential> {
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(Error::InvalidInput(
                "client id and client secret are required".into(),
            ));
        }
        let credential = self
            .store
            .add_credential(NewCredential {
                pool: PoolKind::Video,
                key: client_id.to_string(),
                secret: client_secret.to_string(),
                usage: 0,
                ceiling: VIDEO_DAILY_CEILING,
            })
            .await?;
        info!(credential_id = %credential.id, key = %credential.masked_key(), "video credential added");
        Ok(credential)
    }

    /// Add a translation API key, starting from the usage and limit the
    /// provider reports for it.
    pub async fn add_translation_credential(&self, api_key: &str) -> Result<Credential> {
        if api_key.is_empty() {
            return Err(Error::InvalidInput("api key is required".into()));
        }
        let usage = self.deepl.fetch_usage(api_key).await?;
        let credential = self
            .store
            .add_credential(NewCredential {
                pool: PoolKind::Translation,
                key: api_key.to_string(),
                secret: String::new(),
                usage: usage.character_count,
                ceiling: usage.character_limit,
            })
            .await?;
        info!(
            credential_id = %credential.id,
            key = %credential.masked_key(),
            usage = credential.usage,
            ceiling = credential.ceiling,
            "translation credential added"
        );
        Ok(credential)
    }

    pub async fn credentials(&self, pool: Option<PoolKind>) -> Vec<Credential> {
        self.store.credentials(pool).await
    }

    /// Remove a credential together with its sessions and pending exchanges.
    pub async fn remove_credential(&self, id: &str) -> Result<Credential> {
        let removed = self
            .store
            .remove_credential(id)
            .await?
            .ok_or_else(|| quota_pool::Error::NotFound(format!("credential {id}")))?;
        info!(credential_id = id, pool = %removed.pool, "credential removed");
        Ok(removed)
    }

    /// Start the consent flow for `user_id` on a video credential.
    ///
    /// `redirect_url` is where the user lands after the callback completes.
    pub async fn authorization_url(
        &self,
        user_id: &str,
        credential_id: &str,
        redirect_url: &str,
    ) -> Result<AuthorizationRequest> {
        if user_id.is_empty() {
            return Err(Error::InvalidInput("user id is required".into()));
        }
        if !(redirect_url.starts_with("http://") || redirect_url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "redirect url must be http(s), got {redirect_url:?}"
            )));
        }
        let credential = self.video_credential(credential_id).await?;

        let state = oauth::generate_state();
        let verifier = oauth::generate_verifier();
        let challenge = oauth::compute_challenge(&verifier);
        let url = oauth::build_authorization_url(
            &credential.key,
            &self.callback_uri,
            &state,
            &challenge,
        );

        self.store
            .save_pending(PendingExchange {
                state: state.clone(),
                user_id: user_id.to_string(),
                credential_id: credential.id.clone(),
                redirect_url: redirect_url.to_string(),
                verifier,
                scopes: SCOPES.split(' ').map(String::from).collect(),
                created_at: unix_millis(),
            })
            .await?;

        info!(user_id, credential_id, "authorization flow started");
        Ok(AuthorizationRequest { url, state })
    }

    /// Finish the consent flow: consume the pending state, exchange the code
    /// and store the resulting session.
    pub async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<CompletedAuthorization> {
        if state.is_empty() || code.is_empty() {
            return Err(Error::InvalidInput("state and code are required".into()));
        }
        let pending = self.store.take_pending(state, PENDING_EXCHANGE_TTL).await?;
        let credential = self.video_credential(&pending.credential_id).await?;
        let app = AppCredentials {
            client_id: credential.key.clone(),
            client_secret: credential.secret.clone().into(),
        };

        let now = unix_millis();
        let response = oauth::exchange_code(
            &self.http,
            &app,
            code,
            &pending.verifier,
            &self.callback_uri,
        )
        .await
        .inspect_err(|e| warn!(user_id = %pending.user_id, error = %e, "code exchange failed"))?;

        if response.refresh_token.is_none() {
            warn!(user_id = %pending.user_id, "token response carried no refresh token");
        }
        let scopes = match &response.scope {
            Some(granted) => granted.split(' ').map(String::from).collect(),
            None => pending.scopes.clone(),
        };
        let token = Token::from_response(response, "", now);
        let session = self
            .store
            .create_session(
                &pending.user_id,
                &credential.id,
                SessionTokens {
                    access_token: token.access_token,
                    refresh_token: token.refresh_token,
                    expires_at: token.expires_at,
                },
                scopes,
            )
            .await?;

        info!(
            user_id = %session.user_id,
            session_id = %session.id,
            credential_id = %credential.id,
            "authorization completed, session created"
        );
        Ok(CompletedAuthorization {
            session,
            redirect_url: pending.redirect_url,
        })
    }

    pub async fn sessions(&self, user_id: Option<&str>) -> Vec<Session> {
        self.store.sessions(user_id).await
    }

    pub async fn remove_session(&self, id: &str) -> Result<Session> {
        let removed = self
            .store
            .remove_session(id)
            .await?
            .ok_or_else(|| quota_pool::Error::NotFound(format!("session {id}")))?;
        info!(session_id = id, user_id = %removed.user_id, "session removed");
        Ok(removed)
    }

    async fn video_credential(&self, id: &str) -> Result<Credential> {
        match self.store.credential(id).await {
            Some(c) if c.pool == PoolKind::Video => Ok(c),
            Some(_) => Err(Error::InvalidInput(format!(
                "credential {id} is not a video credential"
            ))),
            None => Err(quota_pool::Error::NotFound(format!("credential {id}")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{mock_upstream, test_factory};
    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use cache::MemoryCache;
    use serde_json::json;

    async fn usage_endpoint(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "DeepL-Auth-Key good-key:fx" {
            return (StatusCode::FORBIDDEN, Json(json!({"message": "Wrong endpoint"})));
        }
        (
            StatusCode::OK,
            Json(json!({"character_count": 42, "character_limit": 500000})),
        )
    }

    async fn service(dir: &tempfile::TempDir) -> AccountService {
        let base = mock_upstream(axum::Router::new().route("/v2/usage", get(usage_endpoint))).await;
        let factory = test_factory(dir).await;
        let store = Arc::new(
            Store::load(dir.path().join("accounts.json"))
                .await
                .unwrap(),
        );
        let deepl = DeepLProvider::new(
            reqwest::Client::new(),
            &format!("{base}/v2"),
            factory,
            Arc::new(MemoryCache::new(10)),
        );
        AccountService::new(
            store,
            reqwest::Client::new(),
            "http://localhost:8080/oauth/callback",
            Arc::new(deepl),
        )
    }

    #[tokio::test]
    async fn translation_key_starts_from_reported_usage() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;

        let credential = accounts
            .add_translation_credential("good-key:fx")
            .await
            .unwrap();
        assert_eq!(credential.pool, PoolKind::Translation);
        assert_eq!(credential.usage, 42);
        assert_eq!(credential.ceiling, 500_000);

        let err = accounts
            .add_translation_credential("bad-key")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(accounts.credentials(Some(PoolKind::Translation)).await.len(), 1);
    }

    #[tokio::test]
    async fn video_credential_gets_daily_budget() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;

        let credential = accounts
            .add_video_credential("client-1.apps.googleusercontent.com", "GOCSPX-x")
            .await
            .unwrap();
        assert_eq!(credential.ceiling, VIDEO_DAILY_CEILING);
        assert_eq!(credential.usage, 0);

        assert!(matches!(
            accounts.add_video_credential("client-2", "").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            accounts
                .add_video_credential("client-1.apps.googleusercontent.com", "other")
                .await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn authorization_url_records_pending_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;
        let credential = accounts
            .add_video_credential("client-1", "secret")
            .await
            .unwrap();

        let request = accounts
            .authorization_url("u1", &credential.id, "https://app.example/done")
            .await
            .unwrap();
        assert!(request.url.starts_with(oauth::AUTHORIZE_ENDPOINT));
        assert!(request.url.contains("client_id=client-1"));
        assert!(request.url.ends_with(&format!("state={}", request.state)));

        // consumed exactly once
        let pending = accounts
            .store
            .take_pending(&request.state, PENDING_EXCHANGE_TTL)
            .await
            .unwrap();
        assert_eq!(pending.user_id, "u1");
        assert_eq!(pending.redirect_url, "https://app.example/done");
        assert!(
            accounts
                .store
                .take_pending(&request.state, PENDING_EXCHANGE_TTL)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn authorization_url_validates_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;
        let video = accounts
            .add_video_credential("client-1", "secret")
            .await
            .unwrap();

        for (user, credential, redirect) in [
            ("", video.id.as_str(), "https://ok"),
            ("u1", video.id.as_str(), "javascript:alert(1)"),
            ("u1", video.id.as_str(), "ftp://host"),
        ] {
            assert!(matches!(
                accounts.authorization_url(user, credential, redirect).await,
                Err(Error::InvalidInput(_))
            ));
        }
        assert!(matches!(
            accounts
                .authorization_url("u1", "missing", "https://ok")
                .await,
            Err(Error::Store(quota_pool::Error::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn completing_unknown_state_fails_before_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;

        let err = accounts
            .complete_authorization("never-issued", "4/code")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown authorization state"));
        assert!(matches!(
            accounts.complete_authorization("", "code").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn removing_missing_records_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;

        assert!(matches!(
            accounts.remove_credential("nope").await,
            Err(Error::Store(quota_pool::Error::NotFound(_)))
        ));
        assert!(matches!(
            accounts.remove_session("nope").await,
            Err(Error::Store(quota_pool::Error::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn removing_credential_cascades_to_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = service(&dir).await;
        let credential = accounts
            .add_video_credential("client-1", "secret")
            .await
            .unwrap();
        let tokens = SessionTokens {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: 0,
        };
        let session = accounts
            .store
            .create_session("u1", &credential.id, tokens, vec![])
            .await
            .unwrap();
        assert_eq!(accounts.sessions(Some("u1")).await.len(), 1);

        accounts.remove_credential(&credential.id).await.unwrap();
        assert!(accounts.sessions(None).await.is_empty());
        assert!(accounts.remove_session(&session.id).await.is_err());
    }
}

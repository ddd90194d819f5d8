//! Provider client factory
//!
//! Every external call starts here: reserve its cost from the quota broker,
//! then hand back a client bound to the reserved credential. The caller runs
//! the request and passes the outcome to `finish`, which commits the
//! reservation on success and releases it on failure.

use std::sync::Arc;

use oauth::{
    AppCredentials, ReactiveTokenSource, RefreshingTokenSource, Token, TokenObserver, TokenSource,
};
use provider::{BoxFuture, Error, Result};
use quota_pool::{PoolSelector, QuotaBroker, Reservation, SessionTokens, Store};
use tracing::{debug, warn};

/// Reserves quota and builds authenticated clients.
#[derive(Clone)]
pub struct ClientFactory {
    broker: QuotaBroker,
    /// Used for token refreshes
    http: reqwest::Client,
}

impl ClientFactory {
    pub fn new(broker: QuotaBroker, http: reqwest::Client) -> Self {
        Self { broker, http }
    }

    /// Reserve `cost` on one of `user_id`'s sessions.
    pub async fn video(&self, user_id: &str, cost: u64) -> Result<VideoClient> {
        let reservation = self
            .broker
            .acquire(PoolSelector::video(user_id), cost)
            .await?;
        let Some(session) = reservation.session().cloned() else {
            reservation.release().await;
            return Err(Error::Provider("video reservation carried no session".into()));
        };

        let credential = reservation.credential();
        let app = AppCredentials {
            client_id: credential.key.clone(),
            client_secret: credential.secret.clone().into(),
        };
        let current = Token {
            access_token: session.tokens.access_token.clone(),
            refresh_token: session.tokens.refresh_token.clone(),
            expires_at: session.tokens.expires_at,
        };
        let persister = SessionPersister {
            store: Arc::clone(self.broker.store()),
            session_id: session.id.clone(),
        };
        let tokens = ReactiveTokenSource::new(
            RefreshingTokenSource::new(self.http.clone(), app, current),
            persister,
            session.tokens.access_token.clone(),
        );

        debug!(
            user_id,
            session_id = %session.id,
            credential_id = %credential.id,
            cost,
            "video client ready"
        );
        Ok(VideoClient {
            reservation,
            session_id: session.id,
            tokens,
        })
    }

    /// Reserve `cost` on the least-used translation key.
    pub async fn translation(&self, cost: u64) -> Result<TranslationClient> {
        let reservation = self.broker.acquire(PoolSelector::Translation, cost).await?;
        debug!(credential_id = %reservation.credential().id, cost, "translation client ready");
        Ok(TranslationClient { reservation })
    }
}

/// A reserved video credential reached through one user session.
pub struct VideoClient {
    reservation: Reservation,
    session_id: String,
    tokens: ReactiveTokenSource<RefreshingTokenSource, SessionPersister>,
}

impl VideoClient {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current access token, refreshed (and persisted) when near expiry.
    pub async fn access_token(&mut self) -> Result<String> {
        let token = self.tokens.token().await.map_err(oauth_error)?;
        Ok(token.access_token)
    }

    /// Settle the reservation according to `result` and pass it through.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        settle(self.reservation, result).await
    }
}

/// A reserved translation API key.
pub struct TranslationClient {
    reservation: Reservation,
}

impl TranslationClient {
    pub fn api_key(&self) -> &str {
        &self.reservation.credential().key
    }

    pub fn credential_id(&self) -> &str {
        &self.reservation.credential().id
    }

    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        settle(self.reservation, result).await
    }
}

async fn settle<T>(reservation: Reservation, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => reservation.commit(),
        Err(e) => {
            debug!(
                credential_id = %reservation.credential().id,
                cost = reservation.cost(),
                error = %e,
                "call failed, releasing reservation"
            );
            reservation.release().await;
        }
    }
    result
}

fn oauth_error(err: oauth::Error) -> Error {
    match err {
        oauth::Error::InvalidCredentials(msg) => {
            Error::Provider(format!("session authorization revoked: {msg}"))
        }
        other => Error::Provider(other.to_string()),
    }
}

/// Writes rotated tokens back to the session they came from.
pub struct SessionPersister {
    store: Arc<Store>,
    session_id: String,
}

impl TokenObserver for SessionPersister {
    fn token_changed<'a>(&'a mut self, token: &'a Token) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let tokens = SessionTokens {
                access_token: token.access_token.clone(),
                refresh_token: token.refresh_token.clone(),
                expires_at: token.expires_at,
            };
            match self.store.update_session(&self.session_id, &tokens).await {
                Ok(()) => debug!(session_id = %self.session_id, "session token updated"),
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "failed to persist rotated token")
                }
            }
        })
    }
}

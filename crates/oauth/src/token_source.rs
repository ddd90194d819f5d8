//! Access-token sources
//!
//! `RefreshingTokenSource` hands out the cached token until it is about to
//! expire and then refreshes it against the token endpoint.
//! `ReactiveTokenSource` wraps any source and notices when the access token
//! rotates: it awaits its `TokenObserver` (which persists the new token)
//! before handing the token to the caller, so a rotated token is never used
//! without having been stored first.
//!
//! Both take `&mut self`. A source belongs to one call at a time; sharing it
//! across tasks needs external synchronisation.

use std::fmt;
use std::time::Duration;

use common::{BoxFuture, unix_millis};
use tracing::debug;

use crate::constants::REFRESH_MARGIN;
use crate::error::Result;
use crate::token::{AppCredentials, TokenResponse, refresh_token};

/// A bearer token with its refresh token and absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
}

impl Token {
    /// Convert a token-endpoint response received at `now` (unix millis).
    ///
    /// Keeps `previous_refresh` when the response carries no refresh token.
    pub fn from_response(response: TokenResponse, previous_refresh: &str, now: u64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .unwrap_or_else(|| previous_refresh.to_string()),
            expires_at: now + response.expires_in * 1000,
        }
    }

    /// Whether the token expires within `margin` of `now` (unix millis).
    pub fn expires_within(&self, margin: Duration, now: u64) -> bool {
        now + margin.as_millis() as u64 >= self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that produces a usable access token.
pub trait TokenSource: Send {
    fn token(&mut self) -> BoxFuture<'_, Result<Token>>;
}

/// Hook invoked when the access token changed.
pub trait TokenObserver: Send {
    /// Called with the new token before it is returned to the caller.
    /// Failures are the observer's to log; the token is returned regardless.
    fn token_changed<'a>(&'a mut self, token: &'a Token) -> BoxFuture<'a, ()>;
}

/// Token source that refreshes shortly before expiry.
pub struct RefreshingTokenSource {
    http: reqwest::Client,
    app: AppCredentials,
    current: Token,
    margin: Duration,
}

impl RefreshingTokenSource {
    pub fn new(http: reqwest::Client, app: AppCredentials, current: Token) -> Self {
        Self {
            http,
            app,
            current,
            margin: REFRESH_MARGIN,
        }
    }
}

impl TokenSource for RefreshingTokenSource {
    fn token(&mut self) -> BoxFuture<'_, Result<Token>> {
        Box::pin(async move {
            let now = unix_millis();
            if !self.current.expires_within(self.margin, now) {
                return Ok(self.current.clone());
            }

            debug!(client_id = %self.app.client_id, "access token expiring, refreshing");
            let response = refresh_token(&self.http, &self.app, &self.current.refresh_token).await?;
            self.current = Token::from_response(response, &self.current.refresh_token, now);
            Ok(self.current.clone())
        })
    }
}

/// Decorator that reports access-token rotation to an observer.
pub struct ReactiveTokenSource<S, O> {
    inner: S,
    observer: O,
    last_access_token: String,
}

impl<S: TokenSource, O: TokenObserver> ReactiveTokenSource<S, O> {
    /// `last_access_token` seeds the comparison, normally with the token
    /// already persisted, so an unchanged token does not fire the observer.
    pub fn new(inner: S, observer: O, last_access_token: impl Into<String>) -> Self {
        Self {
            inner,
            observer,
            last_access_token: last_access_token.into(),
        }
    }
}

impl<S: TokenSource, O: TokenObserver> TokenSource for ReactiveTokenSource<S, O> {
    fn token(&mut self) -> BoxFuture<'_, Result<Token>> {
        Box::pin(async move {
            let token = self.inner.token().await?;
            if token.access_token != self.last_access_token {
                self.observer.token_changed(&token).await;
                self.last_access_token.clone_from(&token.access_token);
            }
            Ok(token)
        })
    }
}

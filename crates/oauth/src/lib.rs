//! Video platform OAuth library
//!
//! Provides state and PKCE generation, authorization URLs, token exchange and
//! refresh, and the token sources used by authenticated video clients. This
//! crate has no storage of its own: sessions live in the credential store,
//! and token rotation is reported through `TokenObserver`.
//!
//! Consent flow:
//! 1. Account service calls `pkce::generate_state()` + `pkce::generate_verifier()`
//! 2. User authorizes via `pkce::build_authorization_url()`
//! 3. Callback handler calls `token::exchange_code()` with the code and verifier
//! 4. The resulting tokens are stored as a session
//! 5. Each video call obtains its token through a `ReactiveTokenSource`
//!    wrapping a `RefreshingTokenSource`; rotated tokens are persisted by
//!    the observer before use

pub mod constants;
pub mod error;
pub mod pkce;
pub mod token;
pub mod token_source;

pub use constants::*;
pub use error::{Error, Result};
pub use pkce::{build_authorization_url, compute_challenge, generate_state, generate_verifier};
pub use token::{AppCredentials, TokenResponse, exchange_code, refresh_token};
pub use token_source::{
    ReactiveTokenSource, RefreshingTokenSource, Token, TokenObserver, TokenSource,
};

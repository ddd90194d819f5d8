//! Video platform OAuth constants
//!
//! Endpoints and scopes of the platform's OAuth 2.0 authorization server.
//! Client id/secret pairs are not constants: they are pooled credentials
//! kept in the credential store.

use std::time::Duration;

/// Authorization endpoint the user is sent to
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Scope needed to read and write captions and localizations.
pub const SCOPES: &str = "https://www.googleapis.com/auth/youtube.force-ssl";

/// An access token this close to expiry is refreshed before use.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Maximum age of a pending authorization exchange.
pub const PENDING_EXCHANGE_TTL: Duration = Duration::from_secs(600);

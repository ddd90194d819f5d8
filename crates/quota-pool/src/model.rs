//! Stored records: credentials, sessions, pending authorization exchanges

use std::fmt;
use std::str::FromStr;

use common::mask;
use serde::{Deserialize, Serialize};

/// Which provider a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Video platform OAuth client (id + secret), used through sessions
    Video,
    /// Translation API key
    Translation,
}

impl PoolKind {
    pub fn label(&self) -> &'static str {
        match self {
            PoolKind::Video => "video",
            PoolKind::Translation => "translation",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PoolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(PoolKind::Video),
            "translation" => Ok(PoolKind::Translation),
            other => Err(format!(
                "unknown pool {other:?} (expected \"video\" or \"translation\")"
            )),
        }
    }
}

/// Which rows a reservation may draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolSelector {
    /// Sessions owned by `user_id`, joined to their video credentials
    Video { user_id: String },
    /// Every translation credential
    Translation,
}

impl PoolSelector {
    pub fn video(user_id: impl Into<String>) -> Self {
        PoolSelector::Video {
            user_id: user_id.into(),
        }
    }

    pub fn pool(&self) -> PoolKind {
        match self {
            PoolSelector::Video { .. } => PoolKind::Video,
            PoolSelector::Translation => PoolKind::Translation,
        }
    }
}

/// A pooled API credential with its usage budget.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub pool: PoolKind,
    /// OAuth client id (video) or API key (translation)
    pub key: String,
    /// OAuth client secret; empty for API keys
    #[serde(default)]
    pub secret: String,
    pub usage: u64,
    pub ceiling: u64,
    pub created_at: u64,
}

impl Credential {
    /// Quota left before the ceiling.
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.usage)
    }

    pub fn masked_key(&self) -> String {
        mask(&self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("key", &self.masked_key())
            .field("secret", &"[REDACTED]")
            .field("usage", &self.usage)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}

/// Token fields of a session; the only part that changes after creation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One user's authorization against one video credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Fixed at creation
    pub credential_id: String,
    #[serde(flatten)]
    pub tokens: SessionTokens,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub created_at: u64,
}

/// State kept between issuing an authorization URL and its callback.
#[derive(Clone, Serialize, Deserialize)]
pub struct PendingExchange {
    pub state: String,
    pub user_id: String,
    pub credential_id: String,
    /// Where the user is sent once the exchange completes
    pub redirect_url: String,
    /// PKCE code verifier
    pub verifier: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub created_at: u64,
}

impl fmt::Debug for PendingExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExchange")
            .field("user_id", &self.user_id)
            .field("credential_id", &self.credential_id)
            .field("redirect_url", &self.redirect_url)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Result of a successful reservation in the store.
#[derive(Debug, Clone)]
pub struct Reserved {
    /// Snapshot taken after the usage increment
    pub credential: Credential,
    /// The session the credential was reached through (video pool only)
    pub session: Option<Session>,
    pub cost: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_kind_parses_case_insensitively() {
        assert_eq!("Video".parse::<PoolKind>().unwrap(), PoolKind::Video);
        assert_eq!(
            "translation".parse::<PoolKind>().unwrap(),
            PoolKind::Translation
        );
        assert!("audio".parse::<PoolKind>().is_err());
    }

    #[test]
    fn credential_debug_masks_key_and_hides_secret() {
        let credential = Credential {
            id: "c1".into(),
            pool: PoolKind::Translation,
            key: "abcdef123456:fx".into(),
            secret: "topsecret".into(),
            usage: 0,
            ceiling: 500_000,
            created_at: 0,
        };
        let debug = format!("{credential:?}");
        assert!(debug.contains("abcde**"));
        assert!(!debug.contains("abcdef123456:fx"));
        assert!(!debug.contains("topsecret"));
    }

    #[test]
    fn session_serializes_flat_token_fields() {
        let session = Session {
            id: "s1".into(),
            user_id: "u1".into(),
            credential_id: "c1".into(),
            tokens: SessionTokens {
                access_token: "ya29.a".into(),
                refresh_token: "1//r".into(),
                expires_at: 42,
            },
            scopes: vec!["youtube.force-ssl".into()],
            created_at: 1,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["access_token"], "ya29.a");
        assert_eq!(json["expires_at"], 42);

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back.tokens, session.tokens);
        assert!(!format!("{back:?}").contains("ya29.a"));
    }

    #[test]
    fn remaining_saturates() {
        let credential = Credential {
            id: "c1".into(),
            pool: PoolKind::Video,
            key: "k".into(),
            secret: String::new(),
            usage: 120,
            ceiling: 100,
            created_at: 0,
        };
        assert_eq!(credential.remaining(), 0);
    }
}

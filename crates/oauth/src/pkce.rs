//! Authorization request helpers: state token, PKCE pair, authorization URL
//!
//! The state token correlates the provider's callback with the pending
//! exchange stored server-side. The PKCE verifier (RFC 7636) is kept with
//! that pending exchange and sent on code exchange; the S256 challenge goes
//! into the authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{AUTHORIZE_ENDPOINT, SCOPES};

/// Generate an opaque, unguessable state token (16 random bytes).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a PKCE code verifier.
///
/// 64 random bytes encode to 86 URL-safe characters, inside the 43-128
/// range RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorization URL for one pooled client.
///
/// Requests offline access with forced consent so the callback always
/// carries a refresh token.
pub fn build_authorization_url(
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", SCOPES)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state)
        .finish();
    format!("{AUTHORIZE_ENDPOINT}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn state_is_url_safe_and_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 22);
        assert!(is_url_safe(&a), "state must be URL-safe: {a}");
        assert_ne!(a, b);
    }

    #[test]
    fn verifier_length_within_rfc_range() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(is_url_safe(&verifier));
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") base64url-encoded
        let challenge = compute_challenge("hello");
        assert_eq!(challenge, "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let challenge = compute_challenge("test-verifier");
        let url = build_authorization_url(
            "123.apps.googleusercontent.com",
            "https://autocc.example.com/oauth/callback",
            "state-123",
            &challenge,
        );

        assert!(url.starts_with(AUTHORIZE_ENDPOINT));
        assert!(url.contains("client_id=123.apps.googleusercontent.com"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Fautocc.example.com%2Foauth%2Fcallback"
        ));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("code_challenge={challenge}")));
        assert!(url.ends_with("state=state-123"));
    }

    #[test]
    fn authorization_url_escapes_every_parameter_value() {
        let url = build_authorization_url(
            "client+1#x",
            "https://app.example.com/cb?next=/dashboard&lang=dé",
            "s",
            "c",
        );
        let parsed = url::Url::parse(&url).unwrap();
        assert_eq!(parsed.fragment(), None);

        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client+1#x");
        assert_eq!(
            params["redirect_uri"],
            "https://app.example.com/cb?next=/dashboard&lang=dé"
        );
        assert_eq!(params["scope"], SCOPES);
        assert!(url.contains("client_id=client%2B1%23x"));
        assert!(url.is_ascii());
    }
}

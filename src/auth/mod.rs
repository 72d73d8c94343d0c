//! Request authentication.
//!
//! A bearer credential is either an identity token (internally minted HS256
//! JWT binding a verified email) or an upstream-native provider key passed
//! through unverified. Native keys carry no identity: no ledger attribution,
//! no budget check, no metering.

pub mod oidc;
pub mod token;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::error::AppError;

pub use self::oidc::{OidcProfile, OidcVerifier};
pub use self::token::{TokenClaims, TokenError, TokenService};

/// The resolved credential of one request.
#[derive(Debug, Clone)]
pub enum RequestAuth {
    /// Verified identity token.
    Identity { email: String },
    /// Upstream-native key, forwarded as-is.
    Native { key: String },
}

impl RequestAuth {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native { .. })
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Identity { email } => Some(email),
            Self::Native { .. } => None,
        }
    }
}

/// Which upstream a native key belongs to, by prefix.
pub fn native_key_provider(token: &str) -> Option<&'static str> {
    if token.starts_with("sk-or-") {
        Some("openrouter")
    } else if token.starts_with("sk-") {
        Some("openai")
    } else if token.starts_with("AIza") {
        Some("gemini")
    } else {
        None
    }
}

/// Pull the bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header encoding".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            AppError::Unauthorized("Authorization header must use Bearer scheme".to_string())
        })?
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthorized("Empty Bearer token".to_string()));
    }

    Ok(token.to_string())
}

/// Classify a bearer credential: native prefixes pass through, anything else
/// must verify as an identity token.
pub fn classify_bearer(token: &str, tokens: &TokenService) -> Result<RequestAuth, AppError> {
    if native_key_provider(token).is_some() {
        return Ok(RequestAuth::Native {
            key: token.to_string(),
        });
    }

    match tokens.verify(token) {
        Ok(claims) => Ok(RequestAuth::Identity {
            email: claims.email,
        }),
        Err(TokenError::Invalid) => Err(AppError::Unauthorized("Invalid token".to_string())),
        Err(TokenError::Revoked) => Err(AppError::Unauthorized(
            "Token is no longer valid".to_string(),
        )),
    }
}

/// Resolve an identity-token-only endpoint's caller. Native keys are
/// rejected: these endpoints attribute work to an email.
pub fn require_identity(headers: &HeaderMap, tokens: &TokenService) -> Result<String, AppError> {
    let token = bearer_token(headers)?;
    match classify_bearer(&token, tokens)? {
        RequestAuth::Identity { email } => Ok(email),
        RequestAuth::Native { .. } => Err(AppError::Unauthorized(
            "requires AIPipe JWT token".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::{HashMap, HashSet};

    fn service() -> TokenService {
        TokenService::new("test-secret", HashMap::new(), HashSet::new())
    }

    #[test]
    fn test_native_key_prefixes() {
        assert_eq!(native_key_provider("sk-or-v1-abc"), Some("openrouter"));
        assert_eq!(native_key_provider("sk-proj-abc"), Some("openai"));
        assert_eq!(native_key_provider("AIzaSyAbc"), Some("gemini"));
        assert_eq!(native_key_provider("eyJhbGciOi"), None);
    }

    #[test]
    fn test_bearer_token_missing_header() {
        let err = bearer_token(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        let err = bearer_token(&headers).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_bearer_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-abc"));
        assert_eq!(bearer_token(&headers).unwrap(), "sk-abc");
    }

    #[test]
    fn test_classify_native() {
        let auth = classify_bearer("sk-or-v1-key", &service()).unwrap();
        assert!(auth.is_native());
        assert!(auth.email().is_none());
    }

    #[test]
    fn test_classify_identity_round_trip() {
        let service = service();
        let token = service.mint("a@b.com").unwrap();
        let auth = classify_bearer(&token, &service).unwrap();
        assert_eq!(auth.email(), Some("a@b.com"));
    }

    #[test]
    fn test_classify_garbage_is_invalid() {
        let err = classify_bearer("not-a-jwt", &service()).unwrap_err();
        match err {
            AppError::Unauthorized(msg) => assert_eq!(msg, "Invalid token"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_require_identity_rejects_native() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-native"));
        let err = require_identity(&headers, &service()).unwrap_err();
        match err {
            AppError::Unauthorized(msg) => assert_eq!(msg, "requires AIPipe JWT token"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

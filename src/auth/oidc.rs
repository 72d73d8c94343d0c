//! OIDC credential verification.
//!
//! The login page hands the browser a third-party OIDC JWT; the gateway
//! verifies it against the issuer's published JWKS and only then mints an
//! internal token. Only `email_verified` identities are accepted.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::AppError;
use crate::http::HttpClient;

/// Subset of the JWKS document we need: RSA components keyed by `kid`.
#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    n: String,
    e: String,
}

/// Claims we read off a verified credential.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcProfile {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Verifies issuer-signed credentials against a JWKS endpoint.
pub struct OidcVerifier {
    http: HttpClient,
    certs_url: String,
}

impl OidcVerifier {
    pub fn new(http: HttpClient, certs_url: impl Into<String>) -> Self {
        Self {
            http,
            certs_url: certs_url.into(),
        }
    }

    /// Verify an RS256 credential: fetch the JWKS, select the signing key by
    /// `kid`, validate, and require a verified email.
    pub async fn verify(&self, credential: &str) -> Result<OidcProfile, AppError> {
        let header = decode_header(credential)
            .map_err(|e| AppError::Unauthorized(format!("Invalid credential: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::Unauthorized("Credential has no key id".to_string()))?;

        let jwks: Jwks = self
            .http
            .inner()
            .get(&self.certs_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::Upstream(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("JWKS parse failed: {e}")))?;

        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.kid.as_deref() == Some(kid.as_str()))
            .ok_or_else(|| AppError::Unauthorized("Unknown signing key".to_string()))?;

        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AppError::Upstream(format!("bad JWKS key material: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        let data = decode::<OidcProfile>(credential, &key, &validation)
            .map_err(|e| AppError::Unauthorized(format!("Invalid credential: {e}")))?;

        if !data.claims.email_verified {
            return Err(AppError::Unauthorized(
                "Email is not verified".to_string(),
            ));
        }

        Ok(data.claims)
    }
}

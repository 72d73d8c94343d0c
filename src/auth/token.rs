use std::collections::{HashMap, HashSet};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Payload of an identity token. No expiry: revocation happens by rotating
/// the per-email salt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token is no longer valid")]
    Revoked,
}

/// Mints and verifies HS256 identity tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    salts: HashMap<String, String>,
    admins: HashSet<String>,
}

impl TokenService {
    pub fn new(secret: &str, salts: HashMap<String, String>, admins: HashSet<String>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            salts,
            admins,
        }
    }

    /// Sign `{email}` plus the current salt when the salt map carries one.
    pub fn mint(&self, email: &str) -> Result<String, AppError> {
        let claims = TokenClaims {
            email: email.to_string(),
            salt: self.salts.get(email).cloned(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify the signature, then the salt rule: a token is acceptable iff
    /// the salt map has no entry for its email, or the token's salt matches
    /// the map's value.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|_| TokenError::Invalid)?;

        if let Some(expected) = self.salts.get(&data.claims.email) {
            if data.claims.salt.as_deref() != Some(expected.as_str()) {
                return Err(TokenError::Revoked);
            }
        }

        Ok(data.claims)
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admins.contains(&email.to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

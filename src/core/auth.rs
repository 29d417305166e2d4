//! Bearer-token verification.
//!
//! Tokens are RS256-signed JWTs checked against a PKIX RSA public key.
//! The verified `sub` claim becomes the caller identity that the quota
//! stage keys on; it travels in the request extensions as a
//! [`VisitorClaim`].
use std::path::Path;

use http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Could not read public key file: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("Could not parse RSA public key: {0}")]
    KeyFormat(jsonwebtoken::errors::Error),

    #[error("Missing Authorization header")]
    MissingHeader,

    #[error("Invalid Authorization header format")]
    MalformedHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Token has no usable 'sub' claim")]
    MissingSubject,
}

impl AuthError {
    /// Single plain-text line written to the client on rejection.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "401 Unauthorized: Missing Authorization header",
            AuthError::MalformedHeader => "401 Unauthorized: Invalid Authorization header format",
            AuthError::MissingSubject => "401 Unauthorized: Invalid token claims",
            _ => "401 Unauthorized: Invalid token",
        }
    }
}

/// Identity extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct VisitorClaim {
    /// The token's `sub` claim.
    pub subject: String,
    /// Remaining claims, for downstream middleware that wants them.
    pub claims: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies RS256 bearer tokens against a configured public key.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from PEM bytes holding a PKIX RSA public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(AuthError::KeyFormat)?;
        // Pinning the algorithm rejects tokens signed with anything but
        // RS256; `exp` stays required and validated by default.
        let validation = Validation::new(Algorithm::RS256);
        Ok(Self { key, validation })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let pem = std::fs::read(path)?;
        Self::from_rsa_pem(&pem)
    }

    /// Verify the `Authorization` header of a request and extract the
    /// caller identity.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<VisitorClaim, AuthError> {
        let header_value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?;
        let header_str = header_value
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;
        let token = header_str
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MalformedHeader)?;
        self.verify(token)
    }

    /// Verify a raw token string.
    pub fn verify(&self, token: &str) -> Result<VisitorClaim, AuthError> {
        let data = jsonwebtoken::decode::<RawClaims>(token, &self.key, &self.validation)?;
        let subject = data
            .claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSubject)?;
        Ok(VisitorClaim {
            subject,
            claims: data.claims.extra,
        })
    }
}

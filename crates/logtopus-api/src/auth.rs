//! Token issuance and verification.
//!
//! Tokens are `EdDSA` (Ed25519) JWTs carrying the identity they were issued to
//! and an expiration. Any other signing algorithm is rejected before the
//! signature is looked at.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity the token was issued to.
    #[serde(rename = "issuedTo")]
    pub issued_to: String,
    /// Expiration as seconds since the Unix epoch.
    pub exp: i64,
}

/// Failure to load the key pair at startup.
#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    /// A key file could not be read.
    #[error("can't read key file {path}: {source}")]
    Read {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The private key is not an Ed25519 PKCS#8 PEM.
    #[error("invalid Ed25519 private key: {0}")]
    PrivateKey(#[source] jsonwebtoken::errors::Error),
    /// The public key is not an Ed25519 SPKI PEM.
    #[error("invalid Ed25519 public key: {0}")]
    PublicKey(#[source] jsonwebtoken::errors::Error),
}

/// Failure to sign a token.
#[derive(Debug, thiserror::Error)]
#[error("failed to sign token: {0}")]
pub struct SigningError(#[source] jsonwebtoken::errors::Error);

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token string is empty.
    #[error("token is empty")]
    Empty,
    /// The token is not a well-formed JWT.
    #[error("can't parse token")]
    Malformed,
    /// The token is signed with something other than `EdDSA`.
    #[error("unexpected signing method")]
    UnexpectedAlgorithm,
    /// Bad signature, expired, or missing claims.
    #[error("invalid token")]
    Invalid,
}

impl TokenError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Empty => crate::audit::REASON_EMPTY_TOKEN,
            Self::Malformed | Self::UnexpectedAlgorithm => crate::audit::REASON_MALFORMED_TOKEN,
            Self::Invalid => crate::audit::REASON_INVALID_TOKEN,
        }
    }

    /// Message returned to the caller.
    ///
    /// An unexpected algorithm is reported like any other unparsable token.
    #[must_use]
    pub const fn public_message(self) -> &'static str {
        match self {
            Self::Empty => "token is empty",
            Self::Malformed | Self::UnexpectedAlgorithm => "can't parse token",
            Self::Invalid => "invalid token",
        }
    }
}

/// Issues and verifies Ed25519-signed tokens.
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    leeway_secs: u64,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("ttl", &self.ttl)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Builds an authority from PEM-encoded key material.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError`] if either key is not an Ed25519 PEM.
    pub fn from_pem(
        private_pem: &[u8],
        public_pem: &[u8],
        ttl: Duration,
    ) -> Result<Self, KeyLoadError> {
        let encoding = EncodingKey::from_ed_pem(private_pem).map_err(KeyLoadError::PrivateKey)?;
        let decoding = DecodingKey::from_ed_pem(public_pem).map_err(KeyLoadError::PublicKey)?;
        Ok(Self {
            encoding,
            decoding,
            ttl,
            leeway_secs: 0,
        })
    }

    /// Builds an authority from configuration, reading key files as needed.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLoadError`] if a key file is unreadable or invalid.
    pub fn from_config(config: &JwtConfig) -> Result<Self, KeyLoadError> {
        let private_pem = pem_source(config.private_key_pem.as_deref(), &config.private_key_path)?;
        let public_pem = pem_source(config.public_key_pem.as_deref(), &config.public_key_path)?;
        let authority = Self::from_pem(
            &private_pem,
            &public_pem,
            Duration::from_secs(config.ttl_secs),
        )?
        .with_leeway(config.leeway_secs);
        tracing::info!(
            ttl_secs = config.ttl_secs,
            leeway_secs = config.leeway_secs,
            "token authority initialized"
        );
        Ok(authority)
    }

    /// Sets the clock skew tolerated on expiration.
    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Returns the validity window of issued tokens.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a token for `identity`, valid from now for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] if signing fails.
    pub fn issue_token(&self, identity: &str) -> Result<String, SigningError> {
        self.issue_token_at(identity, Utc::now())
    }

    /// Issues a token for `identity` as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] if signing fails.
    pub fn issue_token_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SigningError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            issued_to: identity.to_string(),
            exp: now.timestamp().saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding).map_err(SigningError)
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] describing why the token was rejected.
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Empty);
        }

        let header = decode_header(token).map_err(|e| classify(&e))?;
        if header.alg != Algorithm::EdDSA {
            return Err(TokenError::UnexpectedAlgorithm);
        }

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["exp"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| classify(&e))
    }
}

fn classify(error: &jsonwebtoken::errors::Error) -> TokenError {
    match error.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            TokenError::Malformed
        }
        ErrorKind::InvalidAlgorithm => TokenError::UnexpectedAlgorithm,
        _ => TokenError::Invalid,
    }
}

fn pem_source(inline: Option<&str>, path: &str) -> Result<Vec<u8>, KeyLoadError> {
    if let Some(pem) = inline {
        return Ok(pem.as_bytes().to_vec());
    }
    std::fs::read(Path::new(path)).map_err(|source| KeyLoadError::Read {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
    use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey, KeypairBytes};

    fn key_pair(seed: u8) -> (String, String) {
        let secret = [seed; 32];
        let private_pem = KeypairBytes {
            secret_key: secret,
            public_key: None,
        }
        .to_pkcs8_pem(LineEnding::LF)
        .unwrap()
        .to_string();
        let public_pem = SigningKey::from_bytes(&secret)
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        (private_pem, public_pem)
    }

    fn authority(seed: u8) -> TokenAuthority {
        let (private_pem, public_pem) = key_pair(seed);
        TokenAuthority::from_pem(
            private_pem.as_bytes(),
            public_pem.as_bytes(),
            Duration::from_secs(30 * 60),
        )
        .unwrap()
    }

    #[test]
    fn issued_token_verifies() {
        let authority = authority(7);
        let token = authority.issue_token("johnnyHotbody").unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = authority.verify_token(&token).unwrap();
        assert_eq!(claims.issued_to, "johnnyHotbody");
        let remaining = claims.exp - Utc::now().timestamp();
        let ttl = i64::try_from(authority.ttl().as_secs()).unwrap();
        assert!(remaining > 0 && remaining <= ttl, "{remaining}");
    }

    #[test]
    fn token_from_other_key_is_invalid() {
        let token = authority(7).issue_token("johnnyHotbody").unwrap();
        assert_eq!(authority(9).verify_token(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert_eq!(authority(7).verify_token(""), Err(TokenError::Empty));
    }

    #[test]
    fn garbage_is_malformed() {
        let authority = authority(7);
        assert_eq!(authority.verify_token("abc"), Err(TokenError::Malformed));
        assert_eq!(
            authority.verify_token("not.a.token"),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn expired_token_is_invalid() {
        let authority = authority(7);
        let issued = Utc::now() - chrono::Duration::hours(2);
        let token = authority.issue_token_at("johnnyHotbody", issued).unwrap();
        assert_eq!(authority.verify_token(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn leeway_accepts_recently_expired_token() {
        let authority = authority(7).with_leeway(120);
        let issued = Utc::now() - chrono::Duration::seconds(30 * 60 + 30);
        let token = authority.issue_token_at("johnnyHotbody", issued).unwrap();
        assert!(authority.verify_token(&token).is_ok());
    }

    #[test]
    fn hmac_token_is_unexpected_algorithm() {
        let claims = Claims {
            issued_to: "johnnyHotbody".into(),
            exp: Utc::now().timestamp() + 600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"shared-secret"),
        )
        .unwrap();
        let err = authority(7).verify_token(&token).unwrap_err();
        assert_eq!(err, TokenError::UnexpectedAlgorithm);
        assert_eq!(err.public_message(), "can't parse token");
    }

    #[test]
    fn bad_key_material_fails_to_load() {
        let (_, public_pem) = key_pair(7);
        let err = TokenAuthority::from_pem(b"nope", public_pem.as_bytes(), Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, KeyLoadError::PrivateKey(_)));
    }

    #[test]
    fn missing_key_file_reports_path() {
        let config = JwtConfig {
            private_key_path: "/nonexistent/jwtKey".into(),
            ..JwtConfig::default()
        };
        let err = TokenAuthority::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/jwtKey"));
    }

    #[test]
    fn inline_pems_take_precedence() {
        let (private_pem, public_pem) = key_pair(3);
        let config = JwtConfig {
            private_key_path: "/nonexistent/jwtKey".into(),
            public_key_path: "/nonexistent/jwtKey.pub".into(),
            private_key_pem: Some(private_pem),
            public_key_pem: Some(public_pem),
            ..JwtConfig::default()
        };
        let authority = TokenAuthority::from_config(&config).unwrap();
        let token = authority.issue_token("svc").unwrap();
        assert!(authority.verify_token(&token).is_ok());
    }
}

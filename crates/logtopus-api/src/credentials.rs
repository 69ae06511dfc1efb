//! Credential checks for the token exchange.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::CredentialsConfig;

/// Decides whether a user/password pair may obtain a token.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Returns true when `user` and `pass` are accepted.
    async fn authenticate(&self, user: &str, pass: &str) -> bool;
}

/// A single configured credential pair.
///
/// Both sides are compared as SHA-256 digests so the comparison time does not
/// depend on how many leading bytes match.
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password_digest: [u8; 32],
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl StaticCredentials {
    /// Accepts exactly `username` / `password`.
    #[must_use]
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password_digest: Sha256::digest(password.as_bytes()).into(),
        }
    }
}

impl From<&CredentialsConfig> for StaticCredentials {
    fn from(config: &CredentialsConfig) -> Self {
        Self::new(config.username.clone(), &config.password)
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn authenticate(&self, user: &str, pass: &str) -> bool {
        let user_matches =
            Sha256::digest(user.as_bytes()) == Sha256::digest(self.username.as_bytes());
        let pass_matches = <[u8; 32]>::from(Sha256::digest(pass.as_bytes())) == self.password_digest;
        user_matches & pass_matches
    }
}

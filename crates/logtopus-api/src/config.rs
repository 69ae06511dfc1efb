//! Server configuration.

use serde::{Deserialize, Serialize};

pub use logtopus_core::influx::InfluxConfig;
use logtopus_core::{Error, Result};

/// Which point store the server writes to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-memory store (debug only).
    #[default]
    Memory,
    /// `InfluxDB` v2 over HTTP.
    Influx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Top-level server configuration.
pub struct Config {
    /// Listen address (`host:port`).
    pub http_addr: String,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - logs are pretty-printed instead of JSON
    /// - the in-memory store may be used
    /// - `*` is accepted as a CORS origin
    pub debug: bool,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Token signing configuration.
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Credential pair accepted by `/api/v1/auth`.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Store selection.
    #[serde(default)]
    pub store: StoreKind,

    /// Store connection parameters. `org` and `bucket` are used by every store.
    #[serde(default)]
    pub influx: InfluxConfig,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// How long in-flight requests may run after shutdown starts, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "localhost:5000".to_string(),
            debug: false,
            cors: CorsConfig::default(),
            jwt: JwtConfig::default(),
            credentials: CredentialsConfig::default(),
            store: StoreKind::Memory,
            influx: InfluxConfig::default(),
            request_timeout_secs: 10,
            shutdown_grace_secs: 10,
        }
    }
}

/// CORS configuration for browser-based access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Ed25519 key material and lifetime for issued tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Path to the PKCS#8 PEM private key.
    pub private_key_path: String,
    /// Path to the SPKI PEM public key.
    pub public_key_path: String,
    /// Inline private key PEM; takes precedence over `private_key_path`.
    #[serde(default)]
    pub private_key_pem: Option<String>,
    /// Inline public key PEM; takes precedence over `public_key_path`.
    #[serde(default)]
    pub public_key_pem: Option<String>,
    /// Token validity window in seconds.
    pub ttl_secs: u64,
    /// Clock skew tolerated when checking expiration, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            private_key_path: "configs/jwtKey".to_string(),
            public_key_path: "configs/jwtKey.pub".to_string(),
            private_key_pem: None,
            public_key_pem: None,
            ttl_secs: 30 * 60,
            leeway_secs: 0,
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field(
                "private_key_pem",
                &self.private_key_pem.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_key_pem", &self.public_key_pem.is_some())
            .field("ttl_secs", &self.ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// The static credential pair exchanged for tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Accepted user name.
    pub username: String,
    /// Accepted password.
    pub password: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: "johnnyHotbody".to_string(),
            password: "me-llamo-johnny".to_string(),
        }
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `LOGTOPUS_HTTP_ADDR`
    /// - `LOGTOPUS_DEBUG`
    /// - `LOGTOPUS_CORS_ALLOWED_ORIGINS` (comma-separated, or `*`)
    /// - `LOGTOPUS_CORS_MAX_AGE_SECONDS`
    /// - `LOGTOPUS_JWT_PRIVATE_KEY_PATH`
    /// - `LOGTOPUS_JWT_PUBLIC_KEY_PATH`
    /// - `LOGTOPUS_JWT_PRIVATE_KEY_PEM`
    /// - `LOGTOPUS_JWT_PUBLIC_KEY_PEM`
    /// - `LOGTOPUS_JWT_TTL_SECS`
    /// - `LOGTOPUS_JWT_LEEWAY_SECS`
    /// - `LOGTOPUS_AUTH_USER`
    /// - `LOGTOPUS_AUTH_PASS`
    /// - `LOGTOPUS_INFLUX_URL` (selects the Influx store when set)
    /// - `LOGTOPUS_INFLUX_TOKEN`
    /// - `LOGTOPUS_INFLUX_ORG`
    /// - `LOGTOPUS_INFLUX_BUCKET`
    /// - `LOGTOPUS_INFLUX_TIMEOUT_SECS`
    /// - `LOGTOPUS_INFLUX_INSECURE_TLS`
    /// - `LOGTOPUS_REQUEST_TIMEOUT_SECS`
    /// - `LOGTOPUS_SHUTDOWN_GRACE_SECS`
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_string("LOGTOPUS_HTTP_ADDR") {
            config.http_addr = addr;
        }
        if let Some(debug) = env_bool("LOGTOPUS_DEBUG")? {
            config.debug = debug;
        }

        if let Some(origins) = env_string("LOGTOPUS_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = parse_cors_allowed_origins(&origins);
        }
        if let Some(max_age) = env_u64("LOGTOPUS_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        if let Some(path) = env_string("LOGTOPUS_JWT_PRIVATE_KEY_PATH") {
            config.jwt.private_key_path = path;
        }
        if let Some(path) = env_string("LOGTOPUS_JWT_PUBLIC_KEY_PATH") {
            config.jwt.public_key_path = path;
        }
        config.jwt.private_key_pem = env_string("LOGTOPUS_JWT_PRIVATE_KEY_PEM").map(|p| normalize_pem(&p));
        config.jwt.public_key_pem = env_string("LOGTOPUS_JWT_PUBLIC_KEY_PEM").map(|p| normalize_pem(&p));
        if let Some(ttl) = env_u64("LOGTOPUS_JWT_TTL_SECS")? {
            if ttl == 0 {
                return Err(Error::InvalidInput(
                    "LOGTOPUS_JWT_TTL_SECS must be greater than zero".to_string(),
                ));
            }
            config.jwt.ttl_secs = ttl;
        }
        if let Some(leeway) = env_u64("LOGTOPUS_JWT_LEEWAY_SECS")? {
            config.jwt.leeway_secs = leeway;
        }

        if let Some(user) = env_string("LOGTOPUS_AUTH_USER") {
            config.credentials.username = user;
        }
        if let Some(pass) = env_string("LOGTOPUS_AUTH_PASS") {
            config.credentials.password = pass;
        }

        if let Some(url) = env_string("LOGTOPUS_INFLUX_URL") {
            config.store = StoreKind::Influx;
            config.influx.url = url;
        }
        if let Some(token) = env_string("LOGTOPUS_INFLUX_TOKEN") {
            config.influx.token = token;
        }
        if let Some(org) = env_string("LOGTOPUS_INFLUX_ORG") {
            config.influx.org = org;
        }
        if let Some(bucket) = env_string("LOGTOPUS_INFLUX_BUCKET") {
            config.influx.bucket = bucket;
        }
        if let Some(timeout) = env_u64("LOGTOPUS_INFLUX_TIMEOUT_SECS")? {
            config.influx.timeout_secs = timeout;
        }
        if let Some(insecure) = env_bool("LOGTOPUS_INFLUX_INSECURE_TLS")? {
            config.influx.insecure_skip_verify = insecure;
        }

        if let Some(timeout) = env_u64("LOGTOPUS_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = timeout;
        }
        if let Some(grace) = env_u64("LOGTOPUS_SHUTDOWN_GRACE_SECS")? {
            config.shutdown_grace_secs = grace;
        }

        Ok(config)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_cors_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts PEMs passed through env vars with literal `\n` separators.
fn normalize_pem(pem: &str) -> String {
    let trimmed = pem.trim();
    if trimmed.contains("\\n") && !trimmed.contains('\n') {
        trimmed.replace("\\n", "\n")
    } else {
        trimmed.to_string()
    }
}

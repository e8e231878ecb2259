//! Configuration for the authorization service.
//!
//! Settings are loaded from a YAML file with `AUTHSERVICE_`-prefixed
//! environment overrides. All values are immutable after process start.

use serde::Deserialize;

use crate::error::AuthError;

const DEFAULT_STATE_COOKIE_TIMEOUT_SECS: i64 = 300;

/// One endpoint of the identity provider (or of this service's callback).
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// `scheme://hostname[:port]path`, omitting the port when it is the
    /// scheme's default.
    pub fn to_url(&self) -> String {
        if self.is_default_port() {
            format!("{}://{}{}", self.scheme, self.hostname, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.hostname, self.port, self.path)
        }
    }

    pub fn is_default_port(&self) -> bool {
        matches!(
            (self.scheme.as_str(), self.port),
            ("https", 443) | ("http", 80)
        )
    }
}

/// How the decrypted ID token is handed to the application on allow.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenForwarding {
    /// Request header to set, e.g. `authorization`.
    pub header: String,
    /// Prepended to the token with a single space, e.g. `Bearer`. May be empty.
    #[serde(default)]
    pub preamble: String,
}

/// If present, an access-token cookie is maintained alongside the ID-token
/// cookie and forwarded in this header on allow.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenForwarding {
    pub header: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutConfig {
    /// Requests for this path clear the session cookies.
    pub path: String,
    /// Where the user agent is sent afterwards.
    pub redirect_to_uri: String,
}

/// Per-chain OIDC parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    pub authorization: Endpoint,
    pub token: Endpoint,
    #[serde(default)]
    pub jwks_uri: Option<Endpoint>,
    /// Inline JWKS document; takes precedence over `jwks_uri`.
    #[serde(default)]
    pub jwks: Option<String>,
    pub callback: Endpoint,
    pub client_id: String,
    pub client_secret: String,
    /// Key material for the session cryptor. Must decode to 32 bytes
    /// (hex/base64/base64url, optionally prefixed with the format name).
    pub cryptor_secret: String,
    /// `Location` after a successful callback.
    pub landing_page: String,
    #[serde(default)]
    pub cookie_name_prefix: String,
    pub id_token: IdTokenForwarding,
    #[serde(default)]
    pub access_token: Option<AccessTokenForwarding>,
    /// State cookie lifetime in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    #[serde(default)]
    pub logout: Option<LogoutConfig>,
}

fn default_timeout() -> i64 {
    DEFAULT_STATE_COOKIE_TIMEOUT_SECS
}

impl OidcConfig {
    /// The `redirect_uri` value, reconstructed from the callback endpoint.
    pub fn callback_url(&self) -> String {
        self.callback.to_url()
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig("client_id is required".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "client_secret is required".to_string(),
            ));
        }
        if self.cryptor_secret.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "cryptor_secret is required".to_string(),
            ));
        }
        if self.landing_page.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "landing_page is required".to_string(),
            ));
        }
        if self.id_token.header.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "id_token.header is required".to_string(),
            ));
        }
        if self.jwks.is_none() && self.jwks_uri.is_none() {
            return Err(AuthError::InvalidConfig(
                "one of jwks or jwks_uri is required".to_string(),
            ));
        }
        if self.timeout <= 0 {
            return Err(AuthError::InvalidConfig(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        for endpoint in [&self.authorization, &self.token, &self.callback]
            .into_iter()
            .chain(self.jwks_uri.as_ref())
        {
            url::Url::parse(&endpoint.to_url())?;
        }
        Ok(())
    }
}

/// A single header predicate. Exactly one of `prefix` or `equality` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchRule {
    pub header: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub equality: Option<String>,
}

impl MatchRule {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.header.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "match rule requires a header name".to_string(),
            ));
        }
        match (&self.prefix, &self.equality) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(AuthError::InvalidConfig(format!(
                "match rule for `{}` requires exactly one of prefix or equality",
                self.header
            ))),
        }
    }
}

/// A named filter chain: predicates plus the OIDC parameters its filters use.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    /// All rules must hold for the chain to match; an empty list matches
    /// every request.
    #[serde(default, rename = "match")]
    pub matches: Vec<MatchRule>,
    pub oidc: OidcConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub chains: Vec<ChainConfig>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    10003
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.chains.is_empty() {
            return Err(AuthError::InvalidConfig(
                "at least one filter chain is required".to_string(),
            ));
        }
        for chain in &self.chains {
            if chain.name.trim().is_empty() {
                return Err(AuthError::InvalidConfig(
                    "every chain requires a name".to_string(),
                ));
            }
            for rule in &chain.matches {
                rule.validate()?;
            }
            chain.oidc.validate()?;
        }
        Ok(())
    }
}

/// Loads and validates settings from the named file (extension resolved by
/// the loader) with environment overrides.
pub fn load_settings(path: &str) -> Result<Settings, AuthError> {
    let loaded = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(
            config::Environment::with_prefix("AUTHSERVICE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .map_err(|err| AuthError::InvalidConfig(err.to_string()))?;

    let settings: Settings = loaded
        .try_deserialize()
        .map_err(|err| AuthError::InvalidConfig(err.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

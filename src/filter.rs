//! Filter and filter-chain abstractions.
//!
//! A chain decides *whether* it handles a request (header predicates) and
//! hands out a fresh, per-check filter that decides *what happens* to it.
//! Filters carry no state across checks; everything they need is shared
//! through the chain's collaborators.

use async_trait::async_trait;
use std::sync::Arc;

use crate::check::{CheckDecision, CheckRequest};
use crate::config::{ChainConfig, MatchRule, OidcConfig};
use crate::crypto::{AesGcmCryptor, Cryptor, RandomSource, SecureRandom};
use crate::error::AuthError;
use crate::http::{ReqwestTokenEndpoint, TokenEndpoint};
use crate::jwks::{self, Jwks};
use crate::oidc::OidcFilter;
use crate::token_response::{JwksTokenResponseParser, TokenResponseParser};

/// A per-check decision engine. Instances are created for a single check and
/// discarded afterwards.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self, request: &CheckRequest) -> CheckDecision;
}

/// A named set of match predicates plus a filter factory.
pub trait FilterChain: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, request: &CheckRequest) -> bool;
    fn new_filter(&self) -> Box<dyn Filter>;
}

/// Returns the first chain whose predicates all hold for the request.
pub fn select_chain<'a>(
    chains: &'a [Arc<dyn FilterChain>],
    request: &CheckRequest,
) -> Option<&'a Arc<dyn FilterChain>> {
    chains.iter().find(|chain| chain.matches(request))
}

/// The OIDC chain: owns the shared collaborators (cryptor, token endpoint
/// client, token-response parser, RNG) and builds one [`OidcFilter`] per
/// check.
pub struct OidcFilterChain {
    name: String,
    rules: Vec<MatchRule>,
    config: Arc<OidcConfig>,
    cryptor: Arc<dyn Cryptor>,
    token_endpoint: Arc<dyn TokenEndpoint>,
    parser: Arc<dyn TokenResponseParser>,
    random: Arc<dyn RandomSource>,
}

impl OidcFilterChain {
    /// Builds a chain from configuration. Decoding the cryptor secret and
    /// loading the JWKS fail-closed: a misconfigured chain refuses to start.
    pub async fn from_config(chain: ChainConfig) -> Result<Self, AuthError> {
        chain.oidc.validate()?;
        for rule in &chain.matches {
            rule.validate()?;
        }

        let cryptor = Arc::new(AesGcmCryptor::new(&chain.oidc.cryptor_secret)?);
        let keys = load_jwks(&chain.oidc).await?;

        Ok(Self {
            name: chain.name,
            rules: chain.matches,
            config: Arc::new(chain.oidc),
            cryptor,
            token_endpoint: Arc::new(ReqwestTokenEndpoint::new()?),
            parser: Arc::new(JwksTokenResponseParser::new(keys)),
            random: Arc::new(SecureRandom),
        })
    }
}

impl FilterChain for OidcFilterChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &CheckRequest) -> bool {
        self.rules.iter().all(|rule| rule_matches(rule, request))
    }

    fn new_filter(&self) -> Box<dyn Filter> {
        Box::new(OidcFilter::new(
            self.config.clone(),
            self.cryptor.clone(),
            self.token_endpoint.clone(),
            self.parser.clone(),
            self.random.clone(),
        ))
    }
}

async fn load_jwks(config: &OidcConfig) -> Result<Jwks, AuthError> {
    if let Some(raw) = &config.jwks {
        return Jwks::parse(raw);
    }
    if let Some(endpoint) = &config.jwks_uri {
        let client = reqwest::Client::new();
        return jwks::fetch_jwks(&client, &endpoint.to_url()).await;
    }
    Err(AuthError::InvalidConfig(
        "one of jwks or jwks_uri is required".to_string(),
    ))
}

fn rule_matches(rule: &MatchRule, request: &CheckRequest) -> bool {
    let Some(value) = request.header(&rule.header) else {
        return false;
    };
    if let Some(prefix) = &rule.prefix {
        return value.starts_with(prefix.as_str());
    }
    if let Some(expected) = &rule.equality {
        return value == expected;
    }
    false
}

/// A pass-through filter that allows everything. Useful for staging a chain
/// before enabling OIDC on it, and as a test double.
pub struct MockFilter {
    allow: bool,
}

impl MockFilter {
    pub fn new(allow: bool) -> Self {
        Self { allow }
    }
}

#[async_trait]
impl Filter for MockFilter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn process(&self, _request: &CheckRequest) -> CheckDecision {
        if self.allow {
            CheckDecision::Allow { headers: vec![] }
        } else {
            CheckDecision::Deny {
                status: crate::check::DeniedStatus::Unauthenticated,
                http_status: None,
                headers: vec![],
            }
        }
    }
}

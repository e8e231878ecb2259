use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::AuthError;

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// The verification keys for one identity provider.
///
/// Built once at startup (inline config or a single fetch) and immutable
/// afterwards. Only RS256-capable RSA keys are retained, and their components
/// are turned into decoding keys up front so unusable key material fails
/// startup rather than every token exchange.
#[derive(Clone)]
pub struct Jwks {
    keyed: HashMap<String, DecodingKey>,
    unkeyed: Vec<DecodingKey>,
    total_keys: usize,
}

impl Jwks {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let document: JwksDocument = serde_json::from_str(raw)?;

        let mut keyed = HashMap::new();
        let mut unkeyed = Vec::new();

        for key in document.keys {
            if key.kty != "RSA" {
                continue;
            }

            if let Some(alg) = key.alg.as_deref() {
                if alg != "RS256" {
                    continue;
                }
            }

            let n = match key.n {
                Some(v) if !v.trim().is_empty() => v,
                _ => continue,
            };
            let e = match key.e {
                Some(v) if !v.trim().is_empty() => v,
                _ => continue,
            };

            let decoding_key = DecodingKey::from_rsa_components(&n, &e)?;
            match key.kid {
                Some(kid) if !kid.trim().is_empty() => {
                    keyed.insert(kid, decoding_key);
                }
                _ => unkeyed.push(decoding_key),
            }
        }

        let total_keys = keyed.len() + unkeyed.len();
        if total_keys == 0 {
            return Err(AuthError::InvalidJwks(
                "document does not contain usable RSA keys".to_string(),
            ));
        }

        Ok(Self {
            keyed,
            unkeyed,
            total_keys,
        })
    }

    /// A token without `kid` only matches when the set holds a single key.
    pub fn lookup(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        match kid {
            Some(kid) => self.keyed.get(kid),
            None => {
                if self.total_keys == 1 {
                    self.unkeyed.first().or_else(|| self.keyed.values().next())
                } else {
                    None
                }
            }
        }
    }
}

/// One-shot fetch for `jwks_uri` configurations; called at startup only.
pub async fn fetch_jwks(client: &reqwest::Client, jwks_uri: &str) -> Result<Jwks, AuthError> {
    let response = client.get(jwks_uri).send().await?.error_for_status()?;
    let body = response.text().await?;
    Jwks::parse(&body)
}

//! Parsing and validation of the token endpoint's response.
//!
//! See <https://openid.net/specs/openid-connect-core-1_0.html#TokenResponse>.
//! Every failure is logged at info and collapses to `None`; the filter turns
//! that into a protocol-violation denial.

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde_json::Value;
use std::collections::HashSet;

use crate::jwks::Jwks;
use crate::now_unix;

// Knock a few seconds off `expires_in` to absorb the time the exchange took.
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 5;

/// The validated product of a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    /// The raw ID-token JWT, already verified.
    pub id_token: String,
    pub access_token: Option<String>,
    /// Unix seconds at which the session derived from this response expires.
    pub expiry: i64,
}

pub trait TokenResponseParser: Send + Sync {
    fn parse(&self, client_id: &str, expected_nonce: &str, raw: &str) -> Option<TokenResponse>;
}

/// Parser that verifies ID tokens against a fixed JWKS.
///
/// Enforced claims: signature (RS256), `aud` must contain the client id,
/// `exp` with 5 seconds of leeway, and the `nonce` binding. The issuer is
/// not part of the configuration surface and is not checked here.
pub struct JwksTokenResponseParser {
    keys: Jwks,
}

impl JwksTokenResponseParser {
    pub fn new(keys: Jwks) -> Self {
        Self { keys }
    }

    fn verify_id_token(&self, client_id: &str, id_token: &str) -> Option<Value> {
        let header = match decode_header(id_token) {
            Ok(header) => header,
            Err(err) => {
                tracing::info!(error = %err, "failed to parse `id_token` into a JWT");
                return None;
            }
        };
        if header.alg != Algorithm::RS256 {
            tracing::info!("`id_token` uses an unsupported algorithm");
            return None;
        }

        let Some(decoding_key) = self.keys.lookup(header.kid.as_deref()) else {
            tracing::info!("no matching jwk found for the `id_token` kid");
            return None;
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[client_id]);
        validation.leeway = EXPIRY_SAFETY_MARGIN_SECS as u64;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "aud".to_string()]);

        match decode::<Value>(id_token, decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                tracing::info!(error = %err, "`id_token` verification failed");
                None
            }
        }
    }
}

impl TokenResponseParser for JwksTokenResponseParser {
    fn parse(&self, client_id: &str, expected_nonce: &str, raw: &str) -> Option<TokenResponse> {
        let body: Value = match serde_json::from_str(raw) {
            Ok(body) => body,
            Err(err) => {
                tracing::info!(error = %err, "token response is not valid JSON");
                return None;
            }
        };
        let Some(fields) = body.as_object() else {
            tracing::info!("token response is not a JSON object");
            return None;
        };

        // token_type must be Bearer, compared case-insensitively.
        match fields.get("token_type").and_then(Value::as_str) {
            Some(token_type) if token_type.eq_ignore_ascii_case("bearer") => {}
            _ => {
                tracing::info!("missing or incorrect `token_type` in token response");
                return None;
            }
        }

        let Some(id_token) = fields.get("id_token").and_then(Value::as_str) else {
            tracing::info!("missing or invalid `id_token` in token response");
            return None;
        };

        let claims = self.verify_id_token(client_id, id_token)?;

        match claims.get("nonce").and_then(Value::as_str) {
            Some(nonce) if nonce == expected_nonce => {}
            Some(_) => {
                tracing::info!("invalid `nonce` claim in id_token");
                return None;
            }
            None => {
                tracing::info!("failed to retrieve `nonce` from id_token");
                return None;
            }
        }

        let access_token = fields
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        // `expires_in` takes precedence over the JWT expiry: the resource
        // server's access token governs the session lifetime.
        let expiry = match fields.get("expires_in") {
            Some(value) => {
                let Some(expires_in) = value.as_i64().filter(|v| *v > 0) else {
                    tracing::info!("invalid `expires_in` token response field");
                    return None;
                };
                now_unix() + expires_in - EXPIRY_SAFETY_MARGIN_SECS
            }
            None => claims.get("exp").and_then(Value::as_i64).unwrap_or(0),
        };

        Some(TokenResponse {
            id_token: id_token.to_string(),
            access_token,
            expiry,
        })
    }
}

//! The OpenID Connect token-acquisition filter.
//!
//! Implements the Authorization Code flow on behalf of the proxied
//! application: unauthenticated requests are redirected to the identity
//! provider, the callback exchanges the authorization code for tokens, and
//! authenticated requests get the decrypted tokens injected as headers.
//!
//! All session state travels in encrypted cookies; the filter itself holds
//! nothing across checks. Every failure is translated into a deny decision —
//! errors never escape a filter instance.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::cmp;
use std::sync::Arc;

use crate::check::{
    CheckDecision, CheckRequest, DeniedStatus, FOUND, HeaderDirective, headers,
};
use crate::config::{LogoutConfig, OidcConfig};
use crate::cookies;
use crate::crypto::{Cryptor, RandomSource};
use crate::filter::Filter;
use crate::http::TokenEndpoint;
use crate::now_unix;
use crate::token_response::TokenResponseParser;

pub const FILTER_NAME: &str = "oidc";

// The state cookie payload is `<state>;<nonce>`.
const STATE_SEPARATOR: char = ';';

pub struct OidcFilter {
    config: Arc<OidcConfig>,
    cryptor: Arc<dyn Cryptor>,
    token_endpoint: Arc<dyn TokenEndpoint>,
    parser: Arc<dyn TokenResponseParser>,
    random: Arc<dyn RandomSource>,
}

impl OidcFilter {
    pub fn new(
        config: Arc<OidcConfig>,
        cryptor: Arc<dyn Cryptor>,
        token_endpoint: Arc<dyn TokenEndpoint>,
        parser: Arc<dyn TokenResponseParser>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            cryptor,
            token_endpoint,
            parser,
            random,
        }
    }

    fn state_cookie_name(&self) -> String {
        cookies::state_cookie_name(&self.config.cookie_name_prefix)
    }

    fn id_token_cookie_name(&self) -> String {
        cookies::id_token_cookie_name(&self.config.cookie_name_prefix)
    }

    fn access_token_cookie_name(&self) -> String {
        cookies::access_token_cookie_name(&self.config.cookie_name_prefix)
    }

    fn standard_deny_headers() -> Vec<HeaderDirective> {
        vec![
            HeaderDirective::replace(headers::CACHE_CONTROL, headers::NO_CACHE),
            HeaderDirective::replace(headers::PRAGMA, headers::NO_CACHE),
        ]
    }

    /// The request targets the configured callback. The request host may omit
    /// the port when the callback uses the scheme's default port.
    fn matches_callback(&self, request: &CheckRequest) -> bool {
        let callback = &self.config.callback;
        if request.path_without_query() != callback.path {
            return false;
        }
        if request.host == format!("{}:{}", callback.hostname, callback.port) {
            return true;
        }
        callback.is_default_port() && request.host == callback.hostname
    }

    fn logout_response(&self, logout: &LogoutConfig) -> CheckDecision {
        tracing::info!("logout request, clearing session cookies");
        let mut response_headers = vec![HeaderDirective::replace(
            headers::LOCATION,
            logout.redirect_to_uri.as_str(),
        )];
        response_headers.extend(Self::standard_deny_headers());
        for cookie_name in [
            self.id_token_cookie_name(),
            self.access_token_cookie_name(),
            self.state_cookie_name(),
        ] {
            response_headers.push(HeaderDirective::replace(
                headers::SET_COOKIE,
                cookies::delete_cookie_directive(&cookie_name),
            ));
        }
        CheckDecision::Deny {
            status: DeniedStatus::Unauthenticated,
            http_status: Some(FOUND),
            headers: response_headers,
        }
    }

    /// The session cookies are valid: allow the check and inject the tokens.
    /// Returns `None` when any required cookie is missing or rejected, in
    /// which case authentication starts over.
    fn authenticated_decision(&self, request: &CheckRequest) -> Option<CheckDecision> {
        let id_token = self.token_from_cookie(request, &self.id_token_cookie_name())?;

        let mut request_headers = vec![HeaderDirective::replace(
            self.config.id_token.header.as_str(),
            encode_header_value(&self.config.id_token.preamble, &id_token),
        )];

        if let Some(access) = &self.config.access_token {
            let access_token = self.token_from_cookie(request, &self.access_token_cookie_name())?;
            request_headers.push(HeaderDirective::replace(
                access.header.as_str(),
                access_token,
            ));
        }

        Some(CheckDecision::Allow {
            headers: request_headers,
        })
    }

    fn token_from_cookie(&self, request: &CheckRequest, cookie_name: &str) -> Option<String> {
        let value = cookies::cookie_value(request, cookie_name)?;
        self.cryptor.decrypt(value)
    }

    /// Start a fresh Authorization Code flow: bind a new state/nonce pair to
    /// the browser via the state cookie and send it to the provider.
    fn redirect_to_idp(&self) -> CheckDecision {
        let state = self.random.token();
        let nonce = self.random.token();
        let state_cookie = self
            .cryptor
            .encrypt(&format!("{state}{STATE_SEPARATOR}{nonce}"));

        let mut response_headers = vec![HeaderDirective::replace(
            headers::LOCATION,
            self.authorization_url(&state, &nonce),
        )];
        response_headers.extend(Self::standard_deny_headers());
        response_headers.push(HeaderDirective::replace(
            headers::SET_COOKIE,
            cookies::set_cookie_directive(&self.state_cookie_name(), &state_cookie, self.config.timeout),
        ));

        CheckDecision::Deny {
            status: DeniedStatus::Unauthenticated,
            http_status: Some(FOUND),
            headers: response_headers,
        }
    }

    fn authorization_url(&self, state: &str, nonce: &str) -> String {
        // Parameter order is fixed so the redirect is deterministic.
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("client_id", &self.config.client_id);
        query.append_pair("nonce", nonce);
        query.append_pair("redirect_uri", &self.config.callback_url());
        query.append_pair("response_type", "code");
        query.append_pair("scope", "openid");
        query.append_pair("state", state);
        format!("{}?{}", self.config.authorization.to_url(), query.finish())
    }

    /// The callback sub-machine: validate the state binding, exchange the
    /// code, and establish the session cookies. Every early exit deletes the
    /// state cookie so a half-finished flow cannot be resumed.
    async fn retrieve_token(&self, request: &CheckRequest) -> CheckDecision {
        let Some(raw_state) = cookies::cookie_value(request, &self.state_cookie_name()) else {
            tracing::info!("callback request carries no state cookie");
            return self.callback_error(DeniedStatus::InvalidArgument);
        };
        let Some(plaintext) = self.cryptor.decrypt(raw_state) else {
            tracing::info!("state cookie failed to decrypt");
            return self.callback_error(DeniedStatus::InvalidArgument);
        };
        let Some((expected_state, expected_nonce)) = split_state(&plaintext) else {
            tracing::info!("state cookie payload has an invalid format");
            return self.callback_error(DeniedStatus::InvalidArgument);
        };
        let (Some(code), Some(state)) =
            (request.query_param("code"), request.query_param("state"))
        else {
            tracing::info!("callback query is missing `code` or `state`");
            return self.callback_error(DeniedStatus::InvalidArgument);
        };
        if state != expected_state {
            tracing::info!("callback `state` does not match the state cookie");
            return self.callback_error(DeniedStatus::InvalidArgument);
        }

        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", "authorization_code");
            form.append_pair("code", &code);
            form.append_pair("redirect_uri", &self.config.callback_url());
            form.append_pair("client_id", &self.config.client_id);
            form.append_pair("client_secret", &self.config.client_secret);
            form.finish()
        };

        let basic = STANDARD.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));
        let request_headers = vec![
            (
                headers::CONTENT_TYPE.to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ),
            (headers::ACCEPT.to_string(), "application/json".to_string()),
            (headers::AUTHORIZATION.to_string(), format!("Basic {basic}")),
        ];

        let Some(response) = self
            .token_endpoint
            .post(&self.config.token.to_url(), &request_headers, body)
            .await
        else {
            tracing::info!("token endpoint could not be reached");
            return self.callback_error(DeniedStatus::Internal);
        };
        if !(200..300).contains(&response.status) {
            tracing::info!(
                status = response.status,
                "token endpoint returned a non-success status"
            );
            return self.callback_error(DeniedStatus::InvalidArgument);
        }

        let Some(token_response) =
            self.parser
                .parse(&self.config.client_id, expected_nonce, &response.body)
        else {
            return self.callback_error(DeniedStatus::InvalidArgument);
        };
        if self.config.access_token.is_some() && token_response.access_token.is_none() {
            tracing::info!("token response is missing the required `access_token`");
            return self.callback_error(DeniedStatus::InvalidArgument);
        }

        let max_age = cmp::max(0, token_response.expiry - now_unix());
        let mut response_headers = vec![HeaderDirective::replace(
            headers::LOCATION,
            self.config.landing_page.as_str(),
        )];
        response_headers.extend(Self::standard_deny_headers());
        response_headers.push(HeaderDirective::replace(
            headers::SET_COOKIE,
            cookies::set_cookie_directive(
                &self.id_token_cookie_name(),
                &self.cryptor.encrypt(&token_response.id_token),
                max_age,
            ),
        ));
        if self.config.access_token.is_some() {
            if let Some(access_token) = &token_response.access_token {
                response_headers.push(HeaderDirective::replace(
                    headers::SET_COOKIE,
                    cookies::set_cookie_directive(
                        &self.access_token_cookie_name(),
                        &self.cryptor.encrypt(access_token),
                        max_age,
                    ),
                ));
            }
        }
        response_headers.push(HeaderDirective::replace(
            headers::SET_COOKIE,
            cookies::delete_cookie_directive(&self.state_cookie_name()),
        ));

        CheckDecision::Deny {
            status: DeniedStatus::Unauthenticated,
            http_status: Some(FOUND),
            headers: response_headers,
        }
    }

    fn callback_error(&self, status: DeniedStatus) -> CheckDecision {
        let mut response_headers = Self::standard_deny_headers();
        response_headers.push(HeaderDirective::replace(
            headers::SET_COOKIE,
            cookies::delete_cookie_directive(&self.state_cookie_name()),
        ));
        CheckDecision::Deny {
            status,
            http_status: None,
            headers: response_headers,
        }
    }
}

#[async_trait]
impl Filter for OidcFilter {
    fn name(&self) -> &str {
        FILTER_NAME
    }

    async fn process(&self, request: &CheckRequest) -> CheckDecision {
        if !request.has_http_attributes() {
            tracing::info!("check request carries no http attributes");
            return CheckDecision::Deny {
                status: DeniedStatus::InvalidArgument,
                http_status: None,
                headers: Self::standard_deny_headers(),
            };
        }

        if let Some(logout) = &self.config.logout {
            if request.path_without_query() == logout.path {
                return self.logout_response(logout);
            }
        }

        if self.matches_callback(request) {
            return self.retrieve_token(request).await;
        }

        if let Some(decision) = self.authenticated_decision(request) {
            return decision;
        }

        self.redirect_to_idp()
    }
}

fn encode_header_value(preamble: &str, value: &str) -> String {
    if preamble.is_empty() {
        value.to_string()
    } else {
        format!("{preamble} {value}")
    }
}

/// Splits the state cookie payload, requiring exactly one separator and two
/// non-empty halves.
fn split_state(plaintext: &str) -> Option<(&str, &str)> {
    let mut parts = plaintext.split(STATE_SEPARATOR);
    let state = parts.next()?;
    let nonce = parts.next()?;
    if parts.next().is_some() || state.is_empty() || nonce.is_empty() {
        return None;
    }
    Some((state, nonce))
}

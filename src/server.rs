//! The HTTP check endpoint.
//!
//! Serves authorization checks in the forward-auth style: the fronting proxy
//! sends a request describing the original one (via `X-Forwarded-*` headers),
//! and the answer's status tells it what to do. Header values produced by the
//! decision are returned on the response for the proxy to copy.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::check::{CheckDecision, CheckRequest, DeniedStatus, FOUND};
use crate::filter::{FilterChain, select_chain};

pub struct AppState {
    pub chains: Vec<Arc<dyn FilterChain>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(check_handler).with_state(state)
}

async fn check_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let check_request = check_request_from_http(&request);

    let Some(chain) = select_chain(&state.chains, &check_request) else {
        // Unmatched traffic is outside configured policy; the proxy's own
        // rules govern it.
        tracing::debug!(path = %check_request.path, "no filter chain matched the check");
        return Response::new(Body::empty());
    };

    tracing::debug!(chain = chain.name(), path = %check_request.path, "dispatching check");
    let filter = chain.new_filter();
    let decision = filter.process(&check_request).await;
    decision_to_http(decision)
}

fn check_request_from_http(request: &Request) -> CheckRequest {
    let forwarded = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let scheme = forwarded("x-forwarded-proto")
        .or_else(|| request.uri().scheme_str().map(str::to_string))
        .unwrap_or_default();
    let host = forwarded("x-forwarded-host")
        .or_else(|| forwarded("host"))
        .unwrap_or_default();
    let path = forwarded("x-forwarded-uri")
        .or_else(|| request.uri().path_and_query().map(|pq| pq.to_string()))
        .unwrap_or_default();
    let method = forwarded("x-forwarded-method").unwrap_or_else(|| request.method().to_string());

    let headers = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    CheckRequest {
        scheme,
        host,
        path,
        method,
        headers,
    }
}

fn decision_to_http(decision: CheckDecision) -> Response {
    let (status, directives) = match decision {
        CheckDecision::Allow { headers } => (StatusCode::OK, headers),
        CheckDecision::Deny {
            http_status: Some(FOUND),
            headers,
            ..
        } => (StatusCode::FOUND, headers),
        CheckDecision::Deny {
            status, headers, ..
        } => (
            match status {
                DeniedStatus::Unauthenticated => StatusCode::UNAUTHORIZED,
                DeniedStatus::InvalidArgument => StatusCode::BAD_REQUEST,
                DeniedStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            headers,
        ),
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    for directive in directives {
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(directive.name.as_str()),
            HeaderValue::try_from(directive.value.as_str()),
        ) else {
            tracing::warn!(header = %directive.name, "dropping a malformed decision header");
            continue;
        };
        // The response starts without headers, so appending preserves every
        // directive, including repeated Set-Cookie lines.
        response.headers_mut().append(name, value);
    }
    response
}

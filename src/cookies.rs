//! Session cookie codec.
//!
//! All cross-request state lives in three `__Host-` cookies (state, ID token,
//! access token). Every cookie this service emits carries the same attribute
//! set; deletions use the literal value `deleted` with `Max-Age=0`.

use crate::check::{CheckRequest, headers};

const COOKIE_INFIX: &str = "authservice";
const DELETED_VALUE: &str = "deleted";

pub fn state_cookie_name(prefix: &str) -> String {
    cookie_name(prefix, "state")
}

pub fn id_token_cookie_name(prefix: &str) -> String {
    cookie_name(prefix, "id-token")
}

pub fn access_token_cookie_name(prefix: &str) -> String {
    cookie_name(prefix, "access-token")
}

fn cookie_name(prefix: &str, role: &str) -> String {
    if prefix.is_empty() {
        format!("__Host-{COOKIE_INFIX}-{role}-cookie")
    } else {
        format!("__Host-{prefix}-{COOKIE_INFIX}-{role}-cookie")
    }
}

/// Extracts the named cookie from the request's `Cookie` header.
pub fn cookie_value<'a>(request: &'a CheckRequest, cookie_name: &str) -> Option<&'a str> {
    request.header(headers::COOKIE).and_then(|cookie_header| {
        cookie_header.split(';').find_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            (name == cookie_name).then_some(value)
        })
    })
}

/// A `Set-Cookie` value with the fixed attribute policy.
pub fn set_cookie_directive(name: &str, value: &str, max_age: i64) -> String {
    format!("{name}={value}; HttpOnly; Max-Age={max_age}; Path=/; SameSite=Lax; Secure")
}

/// A `Set-Cookie` value instructing the user agent to drop the cookie.
pub fn delete_cookie_directive(name: &str) -> String {
    set_cookie_directive(name, DELETED_VALUE, 0)
}

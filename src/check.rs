//! Abstract check protocol types.
//!
//! The transport that delivers checks (gRPC, forward-auth HTTP, ...) is
//! deliberately kept out of the core: a filter only ever sees a
//! [`CheckRequest`] and answers with a [`CheckDecision`].

/// HTTP header names and values used in check decisions.
pub mod headers {
    pub const ACCEPT: &str = "Accept";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const COOKIE: &str = "Cookie";
    pub const LOCATION: &str = "Location";
    pub const PRAGMA: &str = "Pragma";
    pub const SET_COOKIE: &str = "Set-Cookie";

    pub const NO_CACHE: &str = "no-cache";
}

/// The HTTP status used for every redirect the service issues.
pub const FOUND: u16 = 302;

/// The HTTP attributes of a request under authorization.
///
/// `path` carries the query string; `headers` is an ordered multimap with
/// case-insensitive name lookup.
#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
}

impl CheckRequest {
    /// First value of the named header, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// A check without scheme, host and path carries nothing to decide on.
    pub fn has_http_attributes(&self) -> bool {
        !(self.scheme.is_empty() && self.host.is_empty() && self.path.is_empty())
    }

    pub fn path_without_query(&self) -> &str {
        self.path
            .split_once('?')
            .map_or(self.path.as_str(), |(path, _)| path)
    }

    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, query)| query)
    }

    /// First value of the named query parameter, percent-decoded.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find_map(|(k, v)| (k == key).then(|| v.into_owned()))
    }
}

/// A header to add to the proxied request (on allow) or to the response
/// returned to the user agent (on deny). The core always replaces, never
/// appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderDirective {
    pub name: String,
    pub value: String,
    pub append: bool,
}

impl HeaderDirective {
    pub fn replace(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            append: false,
        }
    }
}

/// Why a check was denied, in the check protocol's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedStatus {
    /// The session is missing or rejected; the response restarts authentication.
    Unauthenticated,
    /// The user agent violated the protocol (tampered cookie, bad query, ...).
    InvalidArgument,
    /// The identity provider could not be reached.
    Internal,
}

/// The outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckDecision {
    Allow {
        headers: Vec<HeaderDirective>,
    },
    Deny {
        status: DeniedStatus,
        /// `Some(302)` when the user agent must be redirected; otherwise the
        /// transport picks its own error status.
        http_status: Option<u16>,
        headers: Vec<HeaderDirective>,
    },
}

//! End-to-end Authorization Code flow against a mock identity provider.
//!
//! Exercises the public chain API with the real cryptor, parser and HTTP
//! client: start-auth issues the redirect and state cookie, the callback
//! exchanges the code and establishes the session, and the session cookie
//! then authenticates a later check.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use mockito::Matcher;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

use authservice::check::{CheckDecision, CheckRequest, DeniedStatus, headers};
use authservice::config::{ChainConfig, Endpoint, IdTokenForwarding, OidcConfig};
use authservice::filter::{Filter, FilterChain, OidcFilterChain};

const CLIENT_ID: &str = "example-app";
const CLIENT_SECRET: &str = "example-secret";
const CRYPTOR_SECRET: &str =
    "hex:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
const KID: &str = "integration-key";

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

fn endpoint(scheme: &str, hostname: &str, port: u16, path: &str) -> Endpoint {
    Endpoint {
        scheme: scheme.to_string(),
        hostname: hostname.to_string(),
        port,
        path: path.to_string(),
    }
}

fn chain_config(token_endpoint: Endpoint, jwks: String) -> ChainConfig {
    ChainConfig {
        name: "integration".to_string(),
        matches: vec![],
        oidc: OidcConfig {
            authorization: endpoint("https", "idp.test", 443, "/authorize"),
            token: token_endpoint,
            jwks_uri: None,
            jwks: Some(jwks),
            callback: endpoint("https", "me.tld", 443, "/callback"),
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            cryptor_secret: CRYPTOR_SECRET.to_string(),
            landing_page: "/landing-page".to_string(),
            cookie_name_prefix: String::new(),
            id_token: IdTokenForwarding {
                header: "authorization".to_string(),
                preamble: "Bearer".to_string(),
            },
            access_token: None,
            timeout: 300,
            logout: None,
        },
    }
}

struct SigningKeys {
    encoding_key: EncodingKey,
    jwks: String,
}

fn signing_keys() -> SigningKeys {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
    let public_key = RsaPublicKey::from(&private_key);

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    let jwks = format!(
        r#"{{"keys":[{{"kty":"RSA","alg":"RS256","kid":"{KID}","n":"{n}","e":"{e}"}}]}}"#
    );
    let encoding_key =
        EncodingKey::from_rsa_der(private_key.to_pkcs1_der().expect("der encoding").as_bytes());
    SigningKeys { encoding_key, jwks }
}

fn header_values<'a>(decision: &'a CheckDecision, name: &str) -> Vec<&'a str> {
    let headers = match decision {
        CheckDecision::Allow { headers } => headers,
        CheckDecision::Deny { headers, .. } => headers,
    };
    headers
        .iter()
        .filter(|directive| directive.name == name)
        .map(|directive| directive.value.as_str())
        .collect()
}

fn cookie_pair_from_set_cookie(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .expect("set-cookie should contain name=value")
        .trim()
        .to_string()
}

fn query_param(location: &str, key: &str) -> String {
    url::Url::parse(location)
        .expect("location should be a url")
        .query_pairs()
        .find_map(|(k, v)| (k == key).then(|| v.into_owned()))
        .unwrap_or_else(|| panic!("location should carry `{key}`"))
}

#[tokio::test]
async fn authorization_code_flow_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let server_url = url::Url::parse(&server.url()).expect("mock server url");
    let token_endpoint = endpoint(
        "http",
        server_url.host_str().expect("mock host"),
        server_url.port().expect("mock port"),
        "/token",
    );

    let keys = signing_keys();
    let chain = OidcFilterChain::from_config(chain_config(token_endpoint, keys.jwks))
        .await
        .expect("chain should build");

    // 1. An unauthenticated check starts the flow.
    let unauth = CheckRequest {
        scheme: "https".to_string(),
        host: "app.test".to_string(),
        path: "/anything".to_string(),
        method: "GET".to_string(),
        headers: vec![],
    };
    let decision = chain.new_filter().process(&unauth).await;
    let locations = header_values(&decision, headers::LOCATION);
    assert_eq!(locations.len(), 1);
    assert!(locations[0].starts_with("https://idp.test/authorize?client_id=example-app&nonce="));

    let state = query_param(locations[0], "state");
    let nonce = query_param(locations[0], "nonce");
    assert_eq!(state.len(), 43);
    assert_eq!(nonce.len(), 43);
    assert_eq!(
        query_param(locations[0], "redirect_uri"),
        "https://me.tld/callback"
    );

    let set_cookies = header_values(&decision, headers::SET_COOKIE);
    assert_eq!(set_cookies.len(), 1);
    assert!(set_cookies[0].starts_with("__Host-authservice-state-cookie="));
    assert!(set_cookies[0].ends_with("HttpOnly; Max-Age=300; Path=/; SameSite=Lax; Secure"));
    let state_cookie = cookie_pair_from_set_cookie(set_cookies[0]);

    // 2. The provider issues an ID token bound to the nonce.
    let id_token = {
        let claims = json!({
            "sub": "1234567890",
            "aud": CLIENT_ID,
            "iat": now_unix(),
            "exp": now_unix() + 300,
            "nonce": nonce,
        });
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        encode(&header, &claims, &keys.encoding_key).expect("token should sign")
    };

    let token_mock = server
        .mock("POST", "/token")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_header("accept", "application/json")
        .match_header(
            "authorization",
            format!("Basic {}", STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"))).as_str(),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "auth-code".into()),
            Matcher::UrlEncoded("redirect_uri".into(), "https://me.tld/callback".into()),
            Matcher::UrlEncoded("client_id".into(), CLIENT_ID.into()),
            Matcher::UrlEncoded("client_secret".into(), CLIENT_SECRET.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "token_type": "Bearer",
                "id_token": id_token,
                "access_token": "expected_access_token",
                "expires_in": 300,
            })
            .to_string(),
        )
        .create_async()
        .await;

    // 3. The callback exchanges the code and establishes the session.
    let callback = CheckRequest {
        scheme: "https".to_string(),
        host: "me.tld".to_string(),
        path: format!("/callback?code=auth-code&state={state}"),
        method: "GET".to_string(),
        headers: vec![("Cookie".to_string(), state_cookie)],
    };
    let decision = chain.new_filter().process(&callback).await;
    token_mock.assert_async().await;

    let CheckDecision::Deny {
        status,
        http_status,
        ..
    } = &decision
    else {
        panic!("callback should deny with a redirect, got {decision:?}");
    };
    assert_eq!(*status, DeniedStatus::Unauthenticated);
    assert_eq!(*http_status, Some(302));
    assert_eq!(header_values(&decision, headers::LOCATION), ["/landing-page"]);
    assert_eq!(
        header_values(&decision, headers::CACHE_CONTROL),
        ["no-cache"]
    );

    let set_cookies = header_values(&decision, headers::SET_COOKIE);
    assert_eq!(set_cookies.len(), 2);
    assert!(set_cookies[0].starts_with("__Host-authservice-id-token-cookie="));
    assert!(
        set_cookies[1].starts_with("__Host-authservice-state-cookie=deleted; HttpOnly; Max-Age=0")
    );
    let session_cookie = cookie_pair_from_set_cookie(set_cookies[0]);

    // 4. The session cookie authenticates a later check.
    let authenticated = CheckRequest {
        scheme: "https".to_string(),
        host: "app.test".to_string(),
        path: "/anything".to_string(),
        method: "GET".to_string(),
        headers: vec![("Cookie".to_string(), session_cookie)],
    };
    let decision = chain.new_filter().process(&authenticated).await;
    let CheckDecision::Allow { headers: injected } = &decision else {
        panic!("session cookie should authenticate, got {decision:?}");
    };
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].name, "authorization");
    assert_eq!(injected[0].value, format!("Bearer {id_token}"));
}

#[tokio::test]
async fn tampered_state_cookie_aborts_the_callback() {
    let keys = signing_keys();
    let chain = OidcFilterChain::from_config(chain_config(
        endpoint("http", "127.0.0.1", 1, "/token"),
        keys.jwks,
    ))
    .await
    .expect("chain should build");

    let callback = CheckRequest {
        scheme: "https".to_string(),
        host: "me.tld".to_string(),
        path: "/callback?code=auth-code&state=whatever".to_string(),
        method: "GET".to_string(),
        headers: vec![(
            "Cookie".to_string(),
            "__Host-authservice-state-cookie=v1.dGFtcGVyZWR0YW1wZXJlZHRhbXBlcmVkdGFtcGVyZWQ"
                .to_string(),
        )],
    };
    let decision = chain.new_filter().process(&callback).await;

    let CheckDecision::Deny {
        status,
        http_status,
        ..
    } = &decision
    else {
        panic!("tampered callback should deny, got {decision:?}");
    };
    assert_eq!(*status, DeniedStatus::InvalidArgument);
    assert_eq!(*http_status, None);
    assert_eq!(
        header_values(&decision, headers::SET_COOKIE),
        ["__Host-authservice-state-cookie=deleted; HttpOnly; Max-Age=0; Path=/; SameSite=Lax; Secure"]
    );
}

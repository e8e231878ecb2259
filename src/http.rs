//! Outbound HTTP to the identity provider's token endpoint.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// One POST to the token endpoint.
///
/// Returns `None` on any transport failure (connect error, deadline, body
/// read error); the caller maps that to an internal-error denial. The
/// implementation must be safe for concurrent use and must cancel the
/// request when the returned future is dropped.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Option<HttpResponse>;
}

pub struct ReqwestTokenEndpoint {
    client: reqwest::Client,
}

impl ReqwestTokenEndpoint {
    pub fn new() -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenEndpoint for ReqwestTokenEndpoint {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Option<HttpResponse> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::info!(error = %err, "token endpoint request failed");
                return None;
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => Some(HttpResponse { status, body }),
            Err(err) => {
                tracing::info!(error = %err, "reading token endpoint response failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_returns_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_header("authorization", "Basic Zm9vOmJhcg==")
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let endpoint = ReqwestTokenEndpoint::new().unwrap();
        let headers = vec![
            (
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ),
            ("Authorization".to_string(), "Basic Zm9vOmJhcg==".to_string()),
        ];
        let response = endpoint
            .post(
                &format!("{}/token", server.url()),
                &headers,
                "grant_type=authorization_code".to_string(),
            )
            .await
            .expect("request should succeed");

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"token_type":"Bearer"}"#);
    }

    #[tokio::test]
    async fn non_success_statuses_are_reported_not_swallowed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(403)
            .with_body("denied")
            .create_async()
            .await;

        let endpoint = ReqwestTokenEndpoint::new().unwrap();
        let response = endpoint
            .post(&format!("{}/token", server.url()), &[], String::new())
            .await
            .expect("transport itself succeeded");
        assert_eq!(response.status, 403);
        assert_eq!(response.body, "denied");
    }

    #[tokio::test]
    async fn transport_failure_yields_none() {
        let endpoint = ReqwestTokenEndpoint::new().unwrap();
        // Nothing listens on this port.
        let response = endpoint
            .post("http://127.0.0.1:9/token", &[], String::new())
            .await;
        assert_eq!(response, None);
    }
}

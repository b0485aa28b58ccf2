use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::LintClient;
use crate::types::LintResult;

#[derive(Serialize)]
struct LintRequest<'a> {
    code: &'a str,
}

/// Client for the lint/format micro-service (`POST {url}` with `{"code": ...}`).
pub struct HttpLintClient {
    url: String,
    client: reqwest::Client,
}

impl HttpLintClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "lint client builder failed, using defaults");
                reqwest::Client::new()
            });
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl LintClient for HttpLintClient {
    async fn lint(&self, code: &str) -> Option<LintResult> {
        let resp = match self.client.post(&self.url).json(&LintRequest { code }).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %self.url, timeout = e.is_timeout(), error = %e, "lint service unreachable");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(url = %self.url, status = resp.status().as_u16(), "lint service error");
            return None;
        }

        match resp.json::<LintResult>().await {
            Ok(result) => {
                debug!(language = %result.language, warnings = result.warnings.len(), "lint complete");
                Some(result)
            }
            Err(e) => {
                warn!(error = %e, "lint response undecodable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trail_core::RiskLevel;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_code_and_decodes_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lint"))
            .and(body_json(serde_json::json!({"code": "if(x){y}"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fixed": "if (x) { y }",
                "language": "javascript",
                "linted": true,
                "severity": "low",
                "warnings": ["spacing"]
            })))
            .mount(&server)
            .await;

        let client = HttpLintClient::new(format!("{}/lint", server.uri()), Duration::from_secs(2));
        let result = client.lint("if(x){y}").await.unwrap();
        assert_eq!(result.fixed, "if (x) { y }");
        assert_eq!(result.severity, RiskLevel::Low);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = HttpLintClient::new(server.uri(), Duration::from_secs(2));
        assert!(client.lint("x").await.is_none());
    }

    #[tokio::test]
    async fn timeout_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"fixed": "x"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let client = HttpLintClient::new(server.uri(), Duration::from_millis(30));
        assert!(client.lint("x").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_is_none() {
        let client = HttpLintClient::new("http://127.0.0.1:9/lint", Duration::from_millis(200));
        assert!(client.lint("x").await.is_none());
    }

    #[tokio::test]
    async fn garbage_body_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        let client = HttpLintClient::new(server.uri(), Duration::from_secs(2));
        assert!(client.lint("x").await.is_none());
    }
}

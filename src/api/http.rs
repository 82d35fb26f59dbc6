//! HTTP implementation of the API collaborator
//!
//! Speaks the `GET <base>/method/<name>?<params>&access_token=..&v=..`
//! convention with a JSON envelope of either `{"response": ...}` or
//! `{"error": {"error_code": n, "error_msg": ...}}`.

use crate::api::{classify, ApiClient, ApiError, Params};
use crate::config::ApiConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Reqwest-backed [`ApiClient`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    version: String,
}

/// Builds the shared HTTP client used by every fetch worker
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("seine/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

impl HttpApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            version: config.version.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/method/{}", self.base_url, method)
    }
}

/// Renders a parameter value into its query-string form
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn call(&self, method: &str, params: &Params, token: &str) -> Result<Value, ApiError> {
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(key, value)| (key.clone(), render(value)))
            .collect();
        query.push(("access_token".to_string(), token.to_string()));
        query.push(("v".to_string(), self.version.clone()));

        let response = self
            .client
            .get(self.method_url(method))
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let envelope: Value = response.json().await?;

        if let Some(error) = envelope.get("error") {
            let code = error
                .get("error_code")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    ApiError::Malformed("error object without numeric error_code".to_string())
                })?;
            let message = error
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            return Err(classify(code, message));
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> HttpApiClient {
        HttpApiClient::new(&ApiConfig {
            base_url: base_url.to_string(),
            version: "5.122".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_call_returns_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/method/friends.get"))
            .and(query_param("user_id", "7"))
            .and(query_param("access_token", "t1"))
            .and(query_param("v", "5.122"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": {"items": [1, 2, 3]}})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let mut params = Params::new();
        params.insert("user_id".to_string(), json!(7));

        let envelope = client.call("friends.get", &params, "t1").await.unwrap();
        assert_eq!(envelope, json!({"response": {"items": [1, 2, 3]}}));
    }

    #[tokio::test]
    async fn test_call_classifies_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/method/groups.getMembers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"error": {"error_code": 29, "error_msg": "Rate limit reached"}}),
            ))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .call("groups.getMembers", &Params::new(), "t1")
            .await
            .unwrap_err();
        assert!(err.is_quota());
    }

    #[tokio::test]
    async fn test_call_surfaces_http_failure_as_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.call("users.get", &Params::new(), "t1").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}

//! Rule-Management Client
//!
//! Lists, deletes and adds filtered-stream rules with the provider's
//! rule endpoint. Every call is a single authenticated request; nothing
//! is retried here, a failure is left for the caller to handle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use super::error::TransportError;
use crate::application::ports::RulesPort;
use crate::domain::rules::{DesiredRules, RuleSet};
use crate::infrastructure::config::{Credentials, RelayConfig};

/// User agent sent with every provider request.
pub const USER_AGENT: &str = concat!("tweet-stream-relay/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the rule-management endpoint.
#[derive(Debug, Clone)]
pub struct RulesClient {
    client: Client,
    rules_url: String,
    credentials: Credentials,
}

impl RulesClient {
    /// Create a client from the relay configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientInit`] if the HTTP client cannot be built.
    pub fn new(config: &RelayConfig) -> Result<Self, TransportError> {
        Self::with_endpoint(
            config.rules_url(),
            config.credentials.clone(),
            config.api.request_timeout,
        )
    }

    /// Create a client for an explicit endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientInit`] if the HTTP client cannot be built.
    pub fn with_endpoint(
        rules_url: String,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ClientInit(e.to_string()))?;

        Ok(Self {
            client,
            rules_url,
            credentials,
        })
    }

    /// Send an authenticated request and decode the provider's answer.
    async fn execute(&self, request: RequestBuilder) -> Result<RuleSet, TransportError> {
        let response = request
            .bearer_auth(self.credentials.bearer_token())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(RuleSet::default());
        }

        let rule_set: RuleSet = serde_json::from_str(&body)?;
        for error in rule_set.provider_errors() {
            tracing::warn!(error = %error, "Provider reported a rule error");
        }
        Ok(rule_set)
    }
}

#[async_trait]
impl RulesPort for RulesClient {
    async fn list_rules(&self) -> Result<RuleSet, TransportError> {
        let rule_set = self.execute(self.client.get(&self.rules_url)).await?;
        tracing::debug!(count = rule_set.rule_count(), "Listed stream rules");
        Ok(rule_set)
    }

    async fn delete_rules(&self, rule_set: &RuleSet) -> Result<Option<RuleSet>, TransportError> {
        let Some(request) = rule_set.to_delete_request() else {
            tracing::debug!("No registered rules to delete");
            return Ok(None);
        };

        let count = request.delete.ids.len();
        let response = self
            .execute(self.client.post(&self.rules_url).json(&request))
            .await?;
        tracing::debug!(count, "Deleted stream rules");
        Ok(Some(response))
    }

    async fn add_rules(&self, desired: &DesiredRules) -> Result<RuleSet, TransportError> {
        let response = self
            .execute(self.client.post(&self.rules_url).json(&desired.to_add_request()))
            .await?;
        tracing::debug!(
            requested = desired.len(),
            registered = response.rule_count(),
            "Added stream rules"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::rules::Rule;

    const RULES_PATH: &str = "/2/tweets/search/stream/rules";

    fn client_for(server: &MockServer) -> RulesClient {
        RulesClient::with_endpoint(
            format!("{}{RULES_PATH}", server.uri()),
            Credentials::new("test-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn list_rules_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RULES_PATH))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "1", "value": "cars"}],
                "meta": {"result_count": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client_for(&server).list_rules().await.unwrap();
        assert_eq!(rules.rule_ids().unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn list_rules_without_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RULES_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"meta": {"result_count": 0}})),
            )
            .mount(&server)
            .await;

        let rules = client_for(&server).list_rules().await.unwrap();
        assert!(rules.data.is_none());
    }

    #[tokio::test]
    async fn list_rules_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RULES_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_rules().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn list_rules_rejects_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RULES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_rules().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn list_rules_reports_unreachable_provider() {
        let client = RulesClient::with_endpoint(
            "http://127.0.0.1:9/rules".to_string(),
            Credentials::new("t".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.list_rules().await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[tokio::test]
    async fn delete_without_rule_list_makes_no_request() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let result = client.delete_rules(&RuleSet::default()).await.unwrap();
        assert!(result.is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_sends_one_batch_with_every_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RULES_PATH))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({"delete": {"ids": ["1", "2"]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"summary": {"deleted": 2, "not_deleted": 0}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot: RuleSet = serde_json::from_value(json!({
            "data": [{"id": "1", "value": "a"}, {"id": "2", "value": "b"}]
        }))
        .unwrap();

        let response = client_for(&server)
            .delete_rules(&snapshot)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.meta.unwrap()["summary"]["deleted"], 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_sends_desired_rules() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RULES_PATH))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"add": [{"value": "cars"}, {"value": "dogs", "tag": "pets"}]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": [
                    {"id": "10", "value": "cars"},
                    {"id": "11", "value": "dogs", "tag": "pets"}
                ],
                "meta": {"summary": {"created": 2, "not_created": 0, "valid": 2, "invalid": 0}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let desired = DesiredRules::new(vec![Rule::new("cars"), Rule::new("dogs").with_tag("pets")]);
        let response = client_for(&server).add_rules(&desired).await.unwrap();
        assert_eq!(response.rule_count(), 2);
    }

    #[tokio::test]
    async fn add_tolerates_provider_errors_in_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RULES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"summary": {"created": 0, "not_created": 1}},
                "errors": [{"value": "cars", "title": "DuplicateRule"}]
            })))
            .mount(&server)
            .await;

        let response = client_for(&server)
            .add_rules(&DesiredRules::default())
            .await
            .unwrap();
        assert_eq!(response.provider_errors().len(), 1);
    }
}

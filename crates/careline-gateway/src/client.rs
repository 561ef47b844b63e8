use async_trait::async_trait;
use careline_core::{AgentKind, CarelineError, CarelineResult, Message, Response};
use careline_orchestrator::{AgentEndpoint, EndpointResolver};
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The `/a2a` URL of an agent listening on `port` under `base_url`.
pub fn agent_url(base_url: &str, port: u16) -> String {
    format!("{}:{port}/a2a", base_url.trim_end_matches('/'))
}

/// A peer agent reached by posting envelopes to its `/a2a` route.
pub struct HttpEndpoint {
    client: Client,
    url: String,
}

impl HttpEndpoint {
    /// Endpoint posting to `url` through `client`.
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// The `/a2a` URL this endpoint posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_error(&self, e: reqwest::Error) -> CarelineError {
        if e.is_timeout() {
            CarelineError::Timeout(format!("{} did not answer in time", self.url))
        } else {
            CarelineError::Transport(format!("{}: {e}", self.url))
        }
    }
}

#[async_trait]
impl AgentEndpoint for HttpEndpoint {
    async fn call(&self, message: Message) -> CarelineResult<Response> {
        debug!(url = %self.url, action = %message.action(), "Posting envelope");
        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CarelineError::Transport(format!(
                "{} returned {status}: {body}",
                self.url
            )));
        }

        response
            .json::<Response>()
            .await
            .map_err(|e| CarelineError::Transport(format!("invalid response from {}: {e}", self.url)))
    }
}

/// Resolves every agent kind to an [`HttpEndpoint`] sharing one client.
pub struct HttpResolver {
    client: Client,
    urls: BTreeMap<AgentKind, String>,
}

impl HttpResolver {
    /// Resolver for all agent kinds, with URLs from `url_for` and a per-request
    /// timeout.
    pub fn new(timeout: Duration, url_for: impl Fn(AgentKind) -> String) -> CarelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CarelineError::Transport(format!("failed to build HTTP client: {e}")))?;
        let urls = AgentKind::ALL
            .into_iter()
            .map(|kind| (kind, url_for(kind)))
            .collect();
        Ok(Self { client, urls })
    }

    /// URL configured for `kind`.
    pub fn url(&self, kind: AgentKind) -> Option<&str> {
        self.urls.get(&kind).map(String::as_str)
    }
}

impl EndpointResolver for HttpResolver {
    fn resolve(&self, kind: AgentKind) -> CarelineResult<Arc<dyn AgentEndpoint>> {
        let url = self
            .urls
            .get(&kind)
            .ok_or_else(|| CarelineError::PeerUnavailable(kind.to_string()))?;
        Ok(Arc::new(HttpEndpoint::new(self.client.clone(), url.clone())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use careline_core::Payload;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> Message {
        Message::new("OrchestratorAgent", AgentKind::Cost, "estimate_costs", Payload::new()).unwrap()
    }

    #[test]
    fn test_agent_url() {
        assert_eq!(agent_url("http://localhost", 8001), "http://localhost:8001/a2a");
        assert_eq!(agent_url("http://localhost/", 8001), "http://localhost:8001/a2a");
    }

    #[tokio::test]
    async fn test_call_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a2a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-1",
                "success": true,
                "payload": {"estimates": []},
                "timestamp": "2024-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = HttpEndpoint::new(Client::new(), format!("{}/a2a", server.uri()));
        let response = endpoint.call(message()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.message_id(), "m-1");
        assert!(response.payload().unwrap().contains_key("estimates"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let endpoint = HttpEndpoint::new(Client::new(), format!("{}/a2a", server.uri()));
        let err = endpoint.call(message()).await.unwrap_err();
        assert!(matches!(err, CarelineError::Transport(_)));
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_inconsistent_envelope_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-1",
                "success": false,
                "timestamp": "2024-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let endpoint = HttpEndpoint::new(Client::new(), format!("{}/a2a", server.uri()));
        let err = endpoint.call(message()).await.unwrap_err();
        assert!(matches!(err, CarelineError::Transport(_)));
    }

    #[tokio::test]
    async fn test_slow_peer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(json!({"message_id": "m", "success": true})),
            )
            .mount(&server)
            .await;

        let uri = server.uri();
        let resolver = HttpResolver::new(Duration::from_millis(100), |_| format!("{uri}/a2a")).unwrap();
        let endpoint = resolver.resolve(AgentKind::Cost).unwrap();
        let err = endpoint.call(message()).await.unwrap_err();
        assert!(matches!(err, CarelineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let resolver =
            HttpResolver::new(Duration::from_secs(1), |_| "http://127.0.0.1:1/a2a".to_string()).unwrap();
        assert_eq!(resolver.url(AgentKind::Records), Some("http://127.0.0.1:1/a2a"));
        let endpoint = resolver.resolve(AgentKind::Records).unwrap();
        let err = endpoint.call(message()).await.unwrap_err();
        assert!(matches!(err, CarelineError::Transport(_)));
    }
}

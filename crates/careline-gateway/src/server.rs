use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use careline_core::{CarelineResult, Message, Response};
use careline_orchestrator::cards::PROTOCOL_VERSION;
use careline_orchestrator::{AgentCard, AgentHost};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    /// The agent behind the routes.
    pub host: Arc<dyn AgentHost>,
    /// URL this agent is reachable at, advertised in its card.
    pub public_url: String,
    /// Extra cards listed by `GET /agents` next to this agent's own.
    pub directory: Vec<AgentCard>,
}

/// HTTP server for a single agent.
pub struct GatewayServer;

impl GatewayServer {
    /// Router for `host`, advertising `public_url` in its card.
    pub fn build(host: Arc<dyn AgentHost>, public_url: impl Into<String>) -> Router {
        Self::build_with_directory(host, public_url, Vec::new())
    }

    /// Build the router, also listing `directory` under `GET /agents`.
    pub fn build_with_directory(
        host: Arc<dyn AgentHost>,
        public_url: impl Into<String>,
        directory: Vec<AgentCard>,
    ) -> Router {
        let state = Arc::new(AppState {
            host,
            public_url: public_url.into(),
            directory,
        });

        Router::new()
            .route("/a2a", post(a2a_handler))
            .route("/health", get(health_handler))
            .route("/agents", get(agents_handler))
            .with_state(state)
    }

    /// Bind `addr` (`host:port`) and serve `app` until the process stops.
    pub async fn serve(app: Router, addr: &str) -> CarelineResult<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn a2a_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Message>, JsonRejection>,
) -> impl IntoResponse {
    let Json(message) = match body {
        Ok(message) => message,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected malformed envelope");
            return (
                rejection.status(),
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    let message_id = message.id().to_string();
    match state.host.call(message).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "Agent call failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(Response::failure(message_id, e.to_string())),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.host.health())
}

async fn agents_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut agents = vec![state.host.card(&state.public_url)];
    agents.extend(
        state
            .directory
            .iter()
            .filter(|card| card.kind != state.host.kind())
            .cloned(),
    );
    Json(json!({
        "protocol_version": PROTOCOL_VERSION,
        "agents": agents,
    }))
}

//! A2A HTTP server: agent card plus the JSON-RPC endpoint
//!
//! Routes:
//! - `GET /`, `GET /.well-known/agent.json`, `GET /.well-known/agent-card.json`: agent card
//! - `POST /`: JSON-RPC (`message/send`, `message/stream`, `tasks/get`, `tasks/cancel`)
//!
//! When the card declares a security scheme every POST must carry a bearer
//! token accepted by the configured [`TokenVerifier`].

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, TokenVerifier, redact_token};
use crate::error::A2aError;
use crate::executor::{CallContext, bearer_token};
use crate::handler::{EventStream, RequestHandler};
use crate::protocol::*;

#[derive(Clone)]
struct ServerState {
    card: Arc<AgentCard>,
    handler: RequestHandler,
    verifier: Arc<dyn TokenVerifier>,
}

pub struct A2aServer {
    state: ServerState,
}

impl A2aServer {
    pub fn new(card: AgentCard, handler: RequestHandler, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            state: ServerState {
                card: Arc::new(card),
                handler,
                verifier,
            },
        }
    }

    pub fn card(&self) -> &AgentCard {
        &self.state.card
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(agent_card).post(jsonrpc))
            .route("/.well-known/agent.json", get(agent_card))
            .route("/.well-known/agent-card.json", get(agent_card))
            .layer(middleware::from_fn_with_state(self.state.clone(), require_bearer))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until Ctrl-C
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind A2A server to {}", addr))?;
        info!(
            "A2A server '{}' listening on {} (auth: {})",
            self.state.card.name,
            addr,
            if self.state.card.requires_auth() {
                self.state.verifier.name()
            } else {
                "open"
            }
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down A2A server");
            })
            .await
            .context("A2A server failed")
    }
}

async fn agent_card(State(state): State<ServerState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

/// Card reads are public. Everything else needs a verified bearer token
/// when the card declares a security scheme.
async fn require_bearer(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    if request.method() == Method::GET || !state.card.requires_auth() {
        return next.run(request).await;
    }

    let wants_stream = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    let Some(token) = bearer_token(request.headers()) else {
        debug!("Rejecting {} {}: no bearer token", request.method(), request.uri());
        return auth_failure(&AuthError::MissingToken, wants_stream);
    };

    match state.verifier.verify(token).await {
        Ok(info) => {
            debug!(
                "Accepted token {} (scopes: {})",
                redact_token(token),
                info.scopes.len()
            );
            next.run(request).await
        }
        Err(e) => {
            warn!("Rejected token {}: {}", redact_token(token), e);
            auth_failure(&e, wants_stream)
        }
    }
}

fn auth_failure(err: &AuthError, wants_stream: bool) -> Response {
    let status = err.status();
    let label = if status == StatusCode::UNAUTHORIZED {
        "unauthorized"
    } else {
        "forbidden"
    };
    let reason = err.to_string();
    if wants_stream {
        (
            status,
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("error {}: {}", label, reason),
        )
            .into_response()
    } else {
        (
            status,
            Json(serde_json::json!({ "error": label, "reason": reason })),
        )
            .into_response()
    }
}

async fn jsonrpc(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return rpc_error(Value::Null, A2aError::Parse(e.to_string())),
    };
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => return rpc_error(Value::Null, A2aError::InvalidRequest(e.to_string())),
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    if request.jsonrpc != JSONRPC_VERSION {
        return rpc_error(
            id,
            A2aError::InvalidRequest(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
        );
    }

    debug!("JSON-RPC {} (id {})", request.method, id);
    match dispatch(&state.handler, request, CallContext::new(headers), id.clone()).await {
        Ok(response) => response,
        Err(e) => rpc_error(id, e),
    }
}

async fn dispatch(
    handler: &RequestHandler,
    request: JsonRpcRequest,
    call_context: CallContext,
    id: Value,
) -> Result<Response, A2aError> {
    match request.method.as_str() {
        METHOD_MESSAGE_SEND => {
            let result = handler
                .on_message_send(params(request.params)?, call_context)
                .await?;
            rpc_result(id, &result)
        }
        METHOD_MESSAGE_STREAM => {
            let events = handler
                .on_message_stream(params(request.params)?, call_context)
                .await?;
            Ok(sse_response(id, events))
        }
        METHOD_TASKS_GET => {
            let task = handler.on_get_task(params(request.params)?).await?;
            rpc_result(id, &task)
        }
        METHOD_TASKS_CANCEL => {
            let task = handler
                .on_cancel_task(params(request.params)?, call_context)
                .await?;
            rpc_result(id, &task)
        }
        other => Err(A2aError::MethodNotFound(other.to_string())),
    }
}

fn params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, A2aError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| A2aError::InvalidParams(e.to_string()))
}

fn rpc_result<T: serde::Serialize>(id: Value, result: &T) -> Result<Response, A2aError> {
    let value = serde_json::to_value(result).map_err(|e| A2aError::Internal(e.into()))?;
    Ok(Json(JsonRpcResponse::success(id, value)).into_response())
}

/// Internal failures answer with HTTP 500; protocol errors with 200
fn rpc_error(id: Value, err: A2aError) -> Response {
    let status = if err.is_internal() {
        warn!("Internal error: {:#}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        debug!("JSON-RPC error {}: {}", err.code(), err);
        StatusCode::OK
    };
    (status, Json(JsonRpcResponse::error(id, err.to_rpc()))).into_response()
}

/// One SSE `data:` frame per event, each a JSON-RPC response
fn sse_response(id: Value, events: EventStream) -> Response {
    let frames = events.map(move |item| {
        let response = match item.and_then(|event| {
            serde_json::to_value(&event).map_err(|e| A2aError::Internal(e.into()))
        }) {
            Ok(value) => JsonRpcResponse::success(id.clone(), value),
            Err(e) => {
                warn!("Stream ended with error: {:#}", e);
                JsonRpcResponse::error(id.clone(), e.to_rpc())
            }
        };
        let json = serde_json::to_string(&response).unwrap_or_default();
        Ok::<_, Infallible>(format!("data: {}\n\n", json))
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(frames)).into_response()
}

//! HTTP server: health, service manifest, REST search plane, and the
//! per-product MCP endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Registered products and version |
//! | `GET` | `/` | Service manifest (markdown with `Accept: text/markdown`, JSON otherwise) |
//! | `POST` | `/api/search` | Direct search (setup/playground front-end) |
//! | `GET` | `/api/doc/{doc_id}` | Whole document by id (`?product=` required) |
//! | `GET` | `/api/products` | Product listing |
//! | `POST` | `/mcp/{product_id}` | MCP JSON-RPC (session via `mcp-session-id` header) |
//! | `DELETE` | `/mcp/{product_id}` | Explicit session close |
//! | `GET` | `/mcp/{product_id}` | `405` (no server-push stream) |
//!
//! # Session routing
//!
//! | Incoming | Action |
//! |----------|--------|
//! | valid session id | refresh activity, forward to that session's server |
//! | unknown session id | `404` with JSON-RPC `-32001` |
//! | no id + `initialize` body | create session, return `mcp-session-id` header |
//! | no id + anything else | `400` with JSON-RPC `-32600` |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; `mcp-session-id` is
//! exposed so browser clients can correlate sessions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ProductConfig;
use crate::context::{with_context, RequestContext};
use crate::logging;
use crate::mcp::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpServer};
use crate::searcher::Searcher;
use crate::session::{SessionPool, SWEEP_INTERVAL};

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Everything needed to serve one product endpoint.
pub struct ProductState {
    pub config: Arc<ProductConfig>,
    pub searcher: Arc<Searcher>,
}

/// Shared application state behind every handler.
pub struct AppState {
    pub products: BTreeMap<String, ProductState>,
    pub sessions: Arc<SessionPool>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/health", get(handle_health))
        .route("/", get(handle_root))
        .route("/api/search", post(handle_api_search))
        .route("/api/doc/{doc_id}", get(handle_api_doc))
        .route("/api/products", get(handle_api_products))
        .route(
            "/mcp/{product_id}",
            post(handle_mcp_post)
                .get(handle_mcp_get)
                .delete(handle_mcp_delete),
        )
        .layer(cors)
        .with_state(state)
}

/// Binds, spawns the session sweeper, and serves until SIGTERM/SIGINT.
/// In-flight requests finish; the sweeper is aborted, never joined.
pub async fn run(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let sweeper = state.sessions.spawn_sweeper(SWEEP_INTERVAL);

    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(
        host,
        port,
        products = state.products.len(),
        "serving MCP endpoints"
    );
    for (id, product) in &state.products {
        tracing::info!(product = %id, collection = %product.config.collection, endpoint = %format!("/mcp/{id}"), "product mounted");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

// ── Health and manifest ──────────────────────────────────────────────

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let products: Vec<Value> = state
        .products
        .values()
        .map(|p| {
            json!({
                "id": p.config.id,
                "name": p.config.name,
                "lang": p.config.lang,
                "collection": p.config.collection,
                "endpoint": format!("/mcp/{}", p.config.id),
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "products": products,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn handle_root(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let wants_markdown = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/markdown"))
        .unwrap_or(false);

    if wants_markdown {
        return (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            service_manifest(&state),
        )
            .into_response();
    }

    Json(json!({
        "name": "docs-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "products": state.products.keys().collect::<Vec<_>>(),
    }))
    .into_response()
}

/// Human-readable service manifest: one section per product with its
/// endpoint and a sample client configuration.
fn service_manifest(state: &AppState) -> String {
    let mut out = String::new();
    out.push_str("# docs-mcp\n\n");
    out.push_str("Documentation retrieval service speaking MCP (Streamable HTTP).\n\n");
    out.push_str("| Product | Language | Endpoint |\n|---|---|---|\n");
    for product in state.products.values() {
        out.push_str(&format!(
            "| {} | {} | `POST /mcp/{}` |\n",
            product.config.name, product.config.lang, product.config.id
        ));
    }
    out.push_str("\n## Client configuration\n");
    for product in state.products.values() {
        out.push_str(&format!(
            "\n### {}\n\n```json\n{{\n  \"mcpServers\": {{\n    \"{}-docs\": {{\n      \"type\": \"http\",\n      \"url\": \"http://<host>:<port>/mcp/{}\"\n    }}\n  }}\n}}\n```\n",
            product.config.name, product.config.id, product.config.id
        ));
    }
    out.push_str("\nSessions: send `initialize`, echo the returned `mcp-session-id` header on every subsequent request. Idle sessions expire after 30 minutes.\n");
    out
}

// ── REST plane (setup/playground front-end) ──────────────────────────

fn rest_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message.into() } })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ApiSearchRequest {
    query: String,
    product: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default = "default_true")]
    use_rerank: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_api_search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApiSearchRequest>,
) -> Response {
    let started = Instant::now();
    if body.query.trim().is_empty() {
        return rest_error(StatusCode::BAD_REQUEST, "bad_request", "query must not be empty");
    }
    let Some(product) = state.products.get(&body.product) else {
        return rest_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!(
                "Product '{}' not found. Available: {:?}",
                body.product,
                state.products.keys().collect::<Vec<_>>()
            ),
        );
    };

    match product
        .searcher
        .search(&body.query, body.limit, body.use_rerank)
        .await
    {
        Ok(response) => {
            let count = response.results.len();
            let mut value = serde_json::to_value(&response).unwrap_or_default();
            value["product"] = json!(body.product);
            logging::access_http(
                "POST",
                "/api/search",
                200,
                started.elapsed().as_secs_f64() * 1000.0,
                count,
            );
            Json(value).into_response()
        }
        Err(e) => {
            logging::access_http(
                "POST",
                "/api/search",
                500,
                started.elapsed().as_secs_f64() * 1000.0,
                0,
            );
            rest_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProductQuery {
    product: String,
}

async fn handle_api_doc(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
    Query(query): Query<ProductQuery>,
) -> Response {
    let Some(product) = state.products.get(&query.product) else {
        return rest_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("Product '{}' not found", query.product),
        );
    };

    match product.searcher.get_doc_chunks(&doc_id).await {
        Ok(chunks) if chunks.is_empty() => rest_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Document {doc_id} not found"),
        ),
        Ok(chunks) => {
            let full_content = chunks
                .iter()
                .map(|c| c.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            Json(json!({
                "doc_id": doc_id,
                "product": query.product,
                "chunk_count": chunks.len(),
                "full_content": full_content,
                "chunks": chunks,
                "metadata": chunks[0].metadata,
            }))
            .into_response()
        }
        Err(e) => rest_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()),
    }
}

async fn handle_api_products(State(state): State<Arc<AppState>>) -> Json<Value> {
    let products: Vec<Value> = state
        .products
        .values()
        .map(|p| {
            json!({
                "id": p.config.id,
                "name": p.config.name,
                "collection": p.config.collection,
                "description": p.config.description,
                "lang": p.config.lang,
                "available": true,
            })
        })
        .collect();
    Json(json!({ "products": products }))
}

// ── MCP dispatch ─────────────────────────────────────────────────────

fn jsonrpc_response(status: StatusCode, body: &JsonRpcResponse) -> Response {
    (status, Json(serde_json::to_value(body).unwrap_or_default())).into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn client_ip(headers: &HeaderMap) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses the body into messages, remembering whether it was a batch.
fn parse_messages(body: &Bytes) -> Result<(Vec<Value>, bool), JsonRpcError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| JsonRpcError::parse_error(format!("Parse error: {e}")))?;
    match value {
        Value::Array(items) if items.is_empty() => {
            Err(JsonRpcError::invalid_request("Empty batch"))
        }
        Value::Array(items) => Ok((items, true)),
        other => Ok((vec![other], false)),
    }
}

fn decode_message(raw: &Value) -> Result<JsonRpcRequest, JsonRpcError> {
    if raw.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcError::invalid_request("Invalid Request"));
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| JsonRpcError::invalid_request(format!("Invalid Request: {e}")))
}

fn is_initialize(raw: &Value) -> bool {
    raw.get("method").and_then(Value::as_str) == Some("initialize")
}

/// `clientInfo` from initialize params, formatted `name/version`.
fn extract_client_info(messages: &[Value]) -> Option<String> {
    let init = messages.iter().find(|m| is_initialize(m))?;
    let info = init.get("params")?.get("clientInfo")?;
    let name = info.get("name")?.as_str()?;
    match info.get("version").and_then(Value::as_str) {
        Some(version) => Some(format!("{name}/{version}")),
        None => Some(name.to_string()),
    }
}

/// Runs every message through the session's server, collecting responses
/// for the requests among them.
async fn dispatch(server: &McpServer, messages: &[Value]) -> Vec<JsonRpcResponse> {
    let mut responses = Vec::new();
    for raw in messages {
        match decode_message(raw) {
            Ok(message) => {
                if let Some(response) = server.handle(message).await {
                    responses.push(response);
                }
            }
            Err(error) => {
                // Only answer for things that expect an answer.
                let expects_reply = raw.get("id").is_some() && raw.get("method").is_some();
                if expects_reply {
                    responses.push(JsonRpcResponse::error(raw.get("id").cloned(), error));
                }
            }
        }
    }
    responses
}

fn respond(
    responses: Vec<JsonRpcResponse>,
    has_request: bool,
    is_batch: bool,
    session_id: Option<&str>,
) -> Response {
    if !has_request || responses.is_empty() {
        // Notifications and client responses only.
        let mut response = StatusCode::ACCEPTED.into_response();
        attach_session(&mut response, session_id);
        return response;
    }

    let body = if is_batch {
        serde_json::to_value(&responses).unwrap_or_default()
    } else {
        serde_json::to_value(&responses[0]).unwrap_or_default()
    };
    let mut response = Json(body).into_response();
    attach_session(&mut response, session_id);
    response
}

fn attach_session(response: &mut Response, session_id: Option<&str>) {
    if let Some(id) = session_id {
        if let Ok(value) = HeaderValue::from_str(id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
}

async fn handle_mcp_post(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(product) = state.products.get(&product_id) else {
        return jsonrpc_response(
            StatusCode::NOT_FOUND,
            &JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request(format!("Unknown product endpoint: {product_id}")),
            ),
        );
    };

    let (messages, is_batch) = match parse_messages(&body) {
        Ok(parsed) => parsed,
        Err(error) => {
            return jsonrpc_response(
                StatusCode::BAD_REQUEST,
                &JsonRpcResponse::error(None, error),
            )
        }
    };
    let has_request = messages
        .iter()
        .any(|m| m.get("id").is_some() && m.get("method").is_some());
    let ip = client_ip(&headers);

    match header_value(&headers, SESSION_HEADER) {
        Some(session_id) => {
            let Some(entry) = state.sessions.get(&product_id, &session_id) else {
                return jsonrpc_response(
                    StatusCode::NOT_FOUND,
                    &JsonRpcResponse::error(None, JsonRpcError::session_not_found()),
                );
            };

            let ctx = RequestContext::new(
                session_id.clone(),
                product_id.clone(),
                entry.client_info.clone(),
                ip,
            );
            let responses = with_context(ctx, async {
                // One request at a time per session.
                let _serial = entry.gate.lock().await;
                dispatch(&entry.server, &messages).await
            })
            .await;
            respond(responses, has_request, is_batch, None)
        }
        None => {
            if !messages.iter().any(is_initialize) {
                return jsonrpc_response(
                    StatusCode::BAD_REQUEST,
                    &JsonRpcResponse::error(
                        None,
                        JsonRpcError::invalid_request(
                            "Missing session ID or not an initialize request.",
                        ),
                    ),
                );
            }

            let client_info = extract_client_info(&messages);
            let server = Arc::new(McpServer::new(
                product.config.clone(),
                product.searcher.clone(),
            ));
            let session_id =
                state
                    .sessions
                    .create(&product_id, server.clone(), client_info.clone());

            let ctx = RequestContext::new(session_id.clone(), product_id.clone(), client_info, ip);
            let responses = with_context(ctx, dispatch(&server, &messages)).await;
            respond(responses, has_request, is_batch, Some(&session_id))
        }
    }
}

/// No server-push stream is offered; clients poll through POST.
async fn handle_mcp_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn handle_mcp_delete(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match header_value(&headers, SESSION_HEADER) {
        Some(session_id) => {
            if state.sessions.remove(&product_id, &session_id) {
                tracing::debug!(product = %product_id, session_id = %session_id, "session closed");
                StatusCode::NO_CONTENT.into_response()
            } else {
                jsonrpc_response(
                    StatusCode::NOT_FOUND,
                    &JsonRpcResponse::error(None, JsonRpcError::session_not_found()),
                )
            }
        }
        None => jsonrpc_response(
            StatusCode::BAD_REQUEST,
            &JsonRpcResponse::error(None, JsonRpcError::invalid_request("Missing session ID")),
        ),
    }
}

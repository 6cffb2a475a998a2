//! Logging setup and access events.
//!
//! Structured JSON lines go to stdout when it is not a terminal (the
//! container case); an interactive terminal gets the colorized
//! human-readable format. Access events for every tool invocation are
//! emitted under the `access` target with `type: "access"` and the full
//! ambient request context.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::context;

pub fn init(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .init();
    }
}

/// Emits one structured access line for a completed tool invocation.
///
/// Context fields come from the ambient [`crate::context::RequestContext`];
/// outside a request scope (unit tests, CLI paths) they fall back to `-`.
pub fn access_tool_call(
    tool: &str,
    query: Option<&str>,
    duration_ms: f64,
    result_count: usize,
    error: Option<&str>,
) {
    let ctx = context::current();
    let request_id = ctx.as_ref().map(|c| c.request_id.as_str()).unwrap_or("-");
    let session_id = ctx.as_ref().map(|c| c.session_id.as_str()).unwrap_or("-");
    let product = ctx.as_ref().map(|c| c.product_id.as_str()).unwrap_or("-");
    let client_info = ctx
        .as_ref()
        .and_then(|c| c.client_info.as_deref())
        .unwrap_or("-");
    let client_ip = ctx.as_ref().map(|c| c.client_ip.as_str()).unwrap_or("-");

    match error {
        None => tracing::info!(
            target: "access",
            r#type = "access",
            request_id,
            session_id,
            product,
            tool,
            query = query.unwrap_or(""),
            client_info,
            client_ip,
            duration_ms,
            result_count = result_count as u64,
            "tool call"
        ),
        Some(err) => tracing::warn!(
            target: "access",
            r#type = "access",
            request_id,
            session_id,
            product,
            tool,
            query = query.unwrap_or(""),
            client_info,
            client_ip,
            duration_ms,
            result_count = result_count as u64,
            error = err,
            "tool call failed"
        ),
    }
}

/// Access line for the REST plane, mirroring the tool-call event shape.
pub fn access_http(method: &str, path: &str, status: u16, duration_ms: f64, result_count: usize) {
    let ctx = context::current();
    let request_id = ctx.as_ref().map(|c| c.request_id.as_str()).unwrap_or("-");
    let client_ip = ctx.as_ref().map(|c| c.client_ip.as_str()).unwrap_or("-");
    tracing::info!(
        target: "access",
        r#type = "access",
        request_id,
        client_ip,
        method,
        path,
        status = status as u64,
        duration_ms,
        result_count = result_count as u64,
        "http request"
    );
}

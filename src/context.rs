//! Ambient per-request context.
//!
//! Tool handlers need the request id, session id, and client identity for
//! access logging without threading them through every signature. The
//! context is carried in a tokio task-local, scoped by the HTTP dispatch
//! layer around each request's handling future.

use std::future::Future;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Identity of the request currently being handled.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub session_id: String,
    pub product_id: String,
    pub client_info: Option<String>,
    pub client_ip: String,
}

impl RequestContext {
    pub fn new(
        session_id: impl Into<String>,
        product_id: impl Into<String>,
        client_info: Option<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            request_id: short_request_id(),
            session_id: session_id.into(),
            product_id: product_id.into(),
            client_info,
            client_ip: client_ip.into(),
        }
    }
}

/// Eight hex characters are plenty for correlating log lines within a day.
fn short_request_id() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full[..8].to_string()
}

/// Runs `f` with `ctx` installed as the ambient request context.
pub async fn with_context<F>(ctx: RequestContext, f: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(ctx, f).await
}

/// The ambient context, if the current task is inside a [`with_context`]
/// scope. Returns `None` on plain tasks (startup, the sweeper, tests).
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

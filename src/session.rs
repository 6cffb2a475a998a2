//! Per-product session pool with TTL reaping.
//!
//! A session is born when a client sends `initialize` without a session id,
//! identified by a server-generated token the client echoes in the
//! `mcp-session-id` header. Sessions are product-scoped: a token issued at
//! `/mcp/spreadjs` is unknown at `/mcp/gcexcel`.
//!
//! Entries are refreshed on every request and reaped by a periodic sweep
//! once idle past the TTL (30 minutes, sweep every 5). Requests within one
//! session are serialized through the entry's gate, preserving MCP's
//! per-session ordering; different sessions proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::mcp::McpServer;

pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct SessionEntry {
    pub server: Arc<McpServer>,
    pub client_info: Option<String>,
    /// Serializes request handling within the session.
    pub gate: tokio::sync::Mutex<()>,
    last_activity: Mutex<Instant>,
}

impl SessionEntry {
    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }
}

/// Session maps for every product endpoint, shared between the HTTP
/// dispatcher and the sweeper task.
pub struct SessionPool {
    ttl: Duration,
    /// product id → session id → entry
    products: Mutex<HashMap<String, HashMap<String, Arc<SessionEntry>>>>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            products: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a fresh session and returns its generated id.
    pub fn create(
        &self,
        product: &str,
        server: Arc<McpServer>,
        client_info: Option<String>,
    ) -> String {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let entry = Arc::new(SessionEntry {
            server,
            client_info,
            gate: tokio::sync::Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
        });
        self.products
            .lock()
            .unwrap()
            .entry(product.to_string())
            .or_default()
            .insert(session_id.clone(), entry);
        tracing::debug!(product, session_id = %session_id, "session created");
        session_id
    }

    /// Looks up a session under its product endpoint, refreshing its
    /// activity timestamp. A valid id presented at another product's path
    /// is unknown by design.
    pub fn get(&self, product: &str, session_id: &str) -> Option<Arc<SessionEntry>> {
        let products = self.products.lock().unwrap();
        let entry = products.get(product)?.get(session_id)?.clone();
        entry.touch();
        Some(entry)
    }

    /// Removes a session (explicit close or transport teardown).
    pub fn remove(&self, product: &str, session_id: &str) -> bool {
        let mut products = self.products.lock().unwrap();
        products
            .get_mut(product)
            .map(|sessions| sessions.remove(session_id).is_some())
            .unwrap_or(false)
    }

    /// Evicts every entry idle past the TTL; returns the eviction count.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        let mut products = self.products.lock().unwrap();
        for sessions in products.values_mut() {
            let before = sessions.len();
            sessions.retain(|_, entry| entry.idle() <= self.ttl);
            evicted += before - sessions.len();
        }
        if evicted > 0 {
            tracing::info!(evicted, "reaped idle sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.products
            .lock()
            .unwrap()
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the periodic sweeper. The returned handle is aborted on
    /// shutdown; the sweeper never blocks it.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.sweep();
            }
        })
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::config::{ChunkerKind, ProductConfig, SearchParams};
    use crate::embedder::Embedder;
    use crate::ratelimit::RateLimiter;
    use crate::searcher::Searcher;
    use crate::store::VectorStore;

    use super::*;

    fn server_for(product: &str) -> Arc<McpServer> {
        let config = Arc::new(ProductConfig {
            id: product.to_string(),
            name: product.to_string(),
            company: "Mescius".to_string(),
            company_short: "ME".to_string(),
            chunker: ChunkerKind::Markdown,
            doc_subdirs: vec!["docs".to_string()],
            search: SearchParams::default(),
            instructions: None,
            lang: "en".to_string(),
            doc_language: "en".to_string(),
            collection: format!("{product}_en"),
            raw_data: product.to_string(),
            description: String::new(),
            resources: BTreeMap::new(),
        });
        let limiter = Arc::new(RateLimiter::new(10, 1000));
        let embedder = Arc::new(Embedder::new(
            "k".to_string(),
            "voyage-code-3".to_string(),
            None,
            limiter,
            8,
        ));
        let store = Arc::new(VectorStore::new("http://127.0.0.1:1", None));
        let searcher = Arc::new(Searcher::new(embedder, store, config.clone(), 10, 60));
        Arc::new(McpServer::new(config, searcher))
    }

    #[tokio::test]
    async fn sessions_are_scoped_to_their_product() {
        let pool = SessionPool::new();
        let id = pool.create("spreadjs", server_for("spreadjs"), None);

        assert!(pool.get("spreadjs", &id).is_some());
        assert!(pool.get("gcexcel", &id).is_none());
        assert!(pool.get("spreadjs", "deadbeef").is_none());
    }

    #[tokio::test]
    async fn remove_closes_only_the_named_session() {
        let pool = SessionPool::new();
        let a = pool.create("spreadjs", server_for("spreadjs"), None);
        let b = pool.create("spreadjs", server_for("spreadjs"), None);

        assert!(pool.remove("spreadjs", &a));
        assert!(!pool.remove("spreadjs", &a));
        assert!(pool.get("spreadjs", &a).is_none());
        assert!(pool.get("spreadjs", &b).is_some());
    }

    #[tokio::test]
    async fn sweep_reaps_only_idle_sessions() {
        let pool = SessionPool::with_ttl(Duration::from_millis(40));
        let stale = pool.create("spreadjs", server_for("spreadjs"), None);
        let fresh = pool.create("spreadjs", server_for("spreadjs"), None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Refreshing one keeps it alive through the sweep.
        assert!(pool.get("spreadjs", &fresh).is_some());

        assert_eq!(pool.sweep(), 1);
        assert!(pool.get("spreadjs", &stale).is_none());
        assert!(pool.get("spreadjs", &fresh).is_some());
    }

    #[tokio::test]
    async fn sweep_with_nothing_idle_is_a_no_op() {
        let pool = SessionPool::with_ttl(Duration::from_secs(3600));
        pool.create("spreadjs", server_for("spreadjs"), None);
        assert_eq!(pool.sweep(), 0);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn ids_are_unique_and_pool_counts_all_products() {
        let pool = SessionPool::new();
        let a = pool.create("spreadjs", server_for("spreadjs"), None);
        let b = pool.create("gcexcel", server_for("gcexcel"), None);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }
}

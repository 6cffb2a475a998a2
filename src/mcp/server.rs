//! Per-session MCP server instance.
//!
//! Each session gets a fresh `McpServer`; the only per-session state is
//! this thin dispatcher, so construction is cheap. All heavy state (the
//! searcher, embedder, and vector store clients) is shared behind `Arc`.
//!
//! The tool surface is fixed:
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `search` | Natural-language query over the product corpus |
//! | `fetch` | Whole-document retrieval by `doc_id` |
//! | `get_code_guidelines` | Verbatim code-reference resources |
//!
//! Every configured resource is also exposed under a `guidelines://{key}`
//! URI via `resources/list` / `resources/read`.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::config::ProductConfig;
use crate::logging;
use crate::searcher::Searcher;

use super::protocol::{
    tool_result, tool_result_text, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    MCP_PROTOCOL_VERSION,
};

/// Upper bound a client may request from the `search` tool.
const SEARCH_LIMIT_MAX: usize = 20;

const SEARCH_NEXT_STEP: &str = "Determine if further queries are needed: if your next code will \
call APIs mentioned in these results and you are not certain of parameter order, types, or \
return values, fetch the full document or search again for that specific API.";

const FETCH_NEXT_STEP: &str = "Full document retrieved. If unfamiliar class or method names \
appear, search for their usage before calling them.";

const WORKFLOW_TEMPLATE: &str = "This server is a documentation knowledge base for {description}. \
It provides hybrid search over API docs, code examples, tutorials, and feature guides.\n\
\n\
Tools:\n\
- search: Query documentation using natural language. Returns ranked summaries with doc_id.\n\
- fetch: Retrieve full document content by doc_id from search results.\n\
- get_code_guidelines: Get CDN/npm import paths. Call BEFORE generating any code with script \
tags or imports.\n\
\n\
Workflow:\n\
1. Search with a natural-language question describing what you need.\n\
2. Review summaries. Fetch the full doc if a result looks relevant.\n\
3. Call get_code_guidelines before generating code with imports or script refs.\n\
4. Never assume API signatures from memory - always verify via search.";

pub struct McpServer {
    config: Arc<ProductConfig>,
    searcher: Arc<Searcher>,
}

impl McpServer {
    pub fn new(config: Arc<ProductConfig>, searcher: Arc<Searcher>) -> Self {
        Self { config, searcher }
    }

    /// Instructions string returned from `initialize`: the fixed workflow
    /// template plus the product's own guidance.
    pub fn instructions(&self) -> String {
        let description = if self.config.description.is_empty() {
            self.config.name.clone()
        } else {
            self.config.description.clone()
        };
        let mut text = WORKFLOW_TEMPLATE.replace("{description}", &description);
        if let Some(extra) = &self.config.instructions {
            text.push_str("\n\n");
            text.push_str(extra);
        }
        text
    }

    /// Handles one message. Notifications and client responses return
    /// `None`; requests always produce a response.
    pub async fn handle(&self, message: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if message.is_client_response() {
            return None;
        }
        let method = message.method.clone()?;
        if message.is_notification() {
            // notifications/initialized, notifications/cancelled, ...
            return None;
        }
        let id = message.id.clone();
        let params = message.params.unwrap_or(Value::Null);

        let result = match method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(&params).await,
            "resources/list" => Ok(self.handle_resources_list()),
            "resources/read" => self.handle_resources_read(&params),
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": {
                "name": format!("{}-docs-mcp", self.config.id),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": self.instructions(),
        })
    }

    fn handle_tools_list(&self) -> Value {
        let product = &self.config.name;
        let search_description = format!(
            "Search {product} documentation. Returns relevant code examples, API docs and \
             feature descriptions. Before calling any API, search to confirm method signatures, \
             parameters, return types, and usage examples; do not rely on memorized API \
             knowledge."
        );
        let fetch_description = format!(
            "Fetch full document content by doc_id for {product}. Search results are summaries \
             only - fetch the full context before implementing code."
        );
        let guidelines_description = format!(
            "Get code generation guidelines for {product}, including CDN links and package \
             references. Call this before generating any code with script tags or import \
             statements."
        );

        json!({
            "tools": [
                {
                    "name": "search",
                    "description": search_description,
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {
                                "type": "string",
                                "minLength": 1,
                                "description": "Natural-language search query",
                            },
                            "limit": {
                                "type": "integer",
                                "minimum": 1,
                                "maximum": SEARCH_LIMIT_MAX,
                                "default": self.config.search.default_limit,
                                "description": "Number of results to return",
                            },
                        },
                        "required": ["query"],
                    },
                },
                {
                    "name": "fetch",
                    "description": fetch_description,
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "doc_id": {
                                "type": "string",
                                "description": "Document ID from search results",
                            },
                        },
                        "required": ["doc_id"],
                    },
                },
                {
                    "name": "get_code_guidelines",
                    "description": guidelines_description,
                    "inputSchema": { "type": "object", "properties": {} },
                },
            ],
        })
    }

    async fn handle_tools_call(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let tool = params["name"]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("Missing tool name"))?;
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let started = Instant::now();
        let query_for_log = args["query"].as_str().map(str::to_string);

        let outcome = match tool {
            "search" => self.tool_search(&args).await,
            "fetch" => self.tool_fetch(&args).await,
            "get_code_guidelines" => Ok(self.tool_guidelines()),
            other => Err(JsonRpcError::invalid_params(format!("Unknown tool: {other}"))),
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            Ok(result) => {
                let count = result_count(result);
                logging::access_tool_call(tool, query_for_log.as_deref(), duration_ms, count, None);
            }
            Err(error) => {
                logging::access_tool_call(
                    tool,
                    query_for_log.as_deref(),
                    duration_ms,
                    0,
                    Some(&error.message),
                );
            }
        }
        outcome
    }

    async fn tool_search(&self, args: &Value) -> Result<Value, JsonRpcError> {
        let query = args["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| JsonRpcError::invalid_params("query must be a non-empty string"))?;

        let limit = match args.get("limit") {
            None | Some(Value::Null) => self.config.search.default_limit,
            Some(value) => match value.as_u64() {
                Some(n) if (1..=SEARCH_LIMIT_MAX as u64).contains(&n) => n as usize,
                _ => {
                    return Err(JsonRpcError::invalid_params(format!(
                        "limit must be an integer in 1..={SEARCH_LIMIT_MAX}"
                    )))
                }
            },
        };

        let response = self
            .searcher
            .search(query, Some(limit), true)
            .await
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;

        let mut body = serde_json::to_value(&response)
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
        body["next_step"] = json!(SEARCH_NEXT_STEP);
        Ok(tool_result(&body, false))
    }

    async fn tool_fetch(&self, args: &Value) -> Result<Value, JsonRpcError> {
        let doc_id = args["doc_id"]
            .as_str()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| JsonRpcError::invalid_params("doc_id must be a non-empty string"))?;

        let chunks = self
            .searcher
            .get_doc_chunks(doc_id)
            .await
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;

        if chunks.is_empty() {
            return Ok(tool_result_text(
                &format!("Document {doc_id} not found"),
                true,
            ));
        }

        let full_content = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let body = json!({
            "doc_id": doc_id,
            "chunk_count": chunks.len(),
            "full_content": full_content,
            "metadata": chunks[0].metadata,
            "next_step": FETCH_NEXT_STEP,
        });
        Ok(tool_result(&body, false))
    }

    fn tool_guidelines(&self) -> Value {
        if self.config.resources.is_empty() {
            let body = json!({
                "guidelines": {},
                "note": format!(
                    "Product {} has no code guidelines configured",
                    self.config.id
                ),
            });
            return tool_result(&body, false);
        }

        let guidelines: Value = self
            .config
            .resources
            .iter()
            .map(|(key, res)| {
                (
                    key.clone(),
                    json!({
                        "name": res.name,
                        "description": res.description,
                        "content": res.content,
                    }),
                )
            })
            .collect::<serde_json::Map<String, Value>>()
            .into();
        tool_result(&json!({ "guidelines": guidelines }), false)
    }

    fn handle_resources_list(&self) -> Value {
        let resources: Vec<Value> = self
            .config
            .resources
            .iter()
            .map(|(key, res)| {
                json!({
                    "uri": format!("guidelines://{key}"),
                    "name": res.name,
                    "description": res.description,
                    "mimeType": res.mime_type,
                })
            })
            .collect();
        json!({ "resources": resources })
    }

    fn handle_resources_read(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let uri = params["uri"]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("Missing resource uri"))?;
        let key = uri
            .strip_prefix("guidelines://")
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown resource uri: {uri}")))?;
        let resource = self
            .config
            .resources
            .get(key)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown resource: {key}")))?;

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": resource.mime_type,
                "text": resource.content,
            }],
        }))
    }
}

/// Result count for the access log: search results when present, else
/// chunk counts, else zero.
fn result_count(tool_result: &Value) -> usize {
    let text = tool_result["content"][0]["text"].as_str().unwrap_or("");
    let Ok(parsed) = serde_json::from_str::<Value>(text) else {
        return 0;
    };
    if let Some(results) = parsed["results"].as_array() {
        return results.len();
    }
    parsed["chunk_count"].as_u64().unwrap_or(0) as usize
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::{ChunkerKind, ProductConfig, Resource, SearchParams};
    use crate::embedder::Embedder;
    use crate::ratelimit::RateLimiter;
    use crate::searcher::Searcher;
    use crate::store::VectorStore;

    use super::*;

    fn test_config(resources: BTreeMap<String, Resource>) -> Arc<ProductConfig> {
        Arc::new(ProductConfig {
            id: "spreadjs".to_string(),
            name: "SpreadJS".to_string(),
            company: "Mescius".to_string(),
            company_short: "ME".to_string(),
            chunker: ChunkerKind::Typedoc,
            doc_subdirs: vec!["apis".to_string()],
            search: SearchParams::default(),
            instructions: Some("Always verify framework wrappers.".to_string()),
            lang: "en".to_string(),
            doc_language: "en".to_string(),
            collection: "spreadjs_en".to_string(),
            raw_data: "spreadjs-en".to_string(),
            description: "JavaScript spreadsheet component".to_string(),
            resources,
        })
    }

    fn test_server(resources: BTreeMap<String, Resource>) -> McpServer {
        let config = test_config(resources);
        let limiter = Arc::new(RateLimiter::new(100, 1_000_000));
        let embedder = Arc::new(Embedder::new(
            "test-key".to_string(),
            "voyage-code-3".to_string(),
            Some("rerank-2.5".to_string()),
            limiter,
            128,
        ));
        // Points at nothing; tests below never touch the network.
        let store = Arc::new(VectorStore::new("http://127.0.0.1:1", None));
        let searcher = Arc::new(Searcher::new(embedder, store, config.clone(), 10, 60));
        McpServer::new(config, searcher)
    }

    fn guidelines_resources() -> BTreeMap<String, Resource> {
        let mut resources = BTreeMap::new();
        resources.insert(
            "cdn_scripts".to_string(),
            Resource {
                name: "CDN scripts".to_string(),
                description: "Script tags".to_string(),
                mime_type: "text/markdown".to_string(),
                content: "<script src=\"https://cdn.example.com/sheets.js\"></script>".to_string(),
            },
        );
        resources
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_instructions() {
        let server = test_server(BTreeMap::new());
        let response = server
            .handle(request(1, "initialize", json!({})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        let instructions = result["instructions"].as_str().unwrap();
        assert!(instructions.contains("JavaScript spreadsheet component"));
        assert!(instructions.contains("Always verify framework wrappers."));
    }

    #[tokio::test]
    async fn tools_list_is_exactly_the_three_tools() {
        let server = test_server(BTreeMap::new());
        let response = server
            .handle(request(2, "tools/list", json!({})))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["search", "fetch", "get_code_guidelines"]);

        let search = &tools[0];
        assert_eq!(search["inputSchema"]["required"][0], "query");
        assert_eq!(search["inputSchema"]["properties"]["limit"]["maximum"], 20);
        assert_eq!(search["inputSchema"]["properties"]["limit"]["default"], 5);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = test_server(BTreeMap::new());
        let notification: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert!(server.handle(notification).await.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let server = test_server(BTreeMap::new());
        let response = server
            .handle(request(3, "prompts/list", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let server = test_server(BTreeMap::new());
        let response = server
            .handle(request(
                4,
                "tools/call",
                json!({ "name": "search", "arguments": { "query": "  " } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn out_of_range_limit_is_rejected() {
        let server = test_server(BTreeMap::new());
        let response = server
            .handle(request(
                5,
                "tools/call",
                json!({ "name": "search", "arguments": { "query": "charts", "limit": 50 } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn guidelines_return_configured_resources() {
        let server = test_server(guidelines_resources());
        let response = server
            .handle(request(
                6,
                "tools/call",
                json!({ "name": "get_code_guidelines", "arguments": {} }),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["guidelines"]["cdn_scripts"]["name"], "CDN scripts");
        assert!(parsed["guidelines"]["cdn_scripts"]["content"]
            .as_str()
            .unwrap()
            .contains("cdn.example.com"));
    }

    #[tokio::test]
    async fn guidelines_placeholder_when_unconfigured() {
        let server = test_server(BTreeMap::new());
        let response = server
            .handle(request(
                7,
                "tools/call",
                json!({ "name": "get_code_guidelines", "arguments": {} }),
            ))
            .await
            .unwrap();
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert!(parsed["guidelines"].as_object().unwrap().is_empty());
        assert!(parsed["note"].as_str().unwrap().contains("spreadjs"));
    }

    #[tokio::test]
    async fn resources_are_exposed_under_guidelines_uris() {
        let server = test_server(guidelines_resources());
        let listed = server
            .handle(request(8, "resources/list", json!({})))
            .await
            .unwrap();
        let resources = listed.result.unwrap()["resources"].as_array().unwrap().clone();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0]["uri"], "guidelines://cdn_scripts");
        assert_eq!(resources[0]["mimeType"], "text/markdown");

        let read = server
            .handle(request(
                9,
                "resources/read",
                json!({ "uri": "guidelines://cdn_scripts" }),
            ))
            .await
            .unwrap();
        let contents = read.result.unwrap()["contents"][0].clone();
        assert!(contents["text"].as_str().unwrap().contains("script src"));

        let missing = server
            .handle(request(
                10,
                "resources/read",
                json!({ "uri": "guidelines://nope" }),
            ))
            .await
            .unwrap();
        assert_eq!(missing.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn ping_answers_empty_object() {
        let server = test_server(BTreeMap::new());
        let response = server.handle(request(11, "ping", json!({}))).await.unwrap();
        assert_eq!(response.result.unwrap(), json!({}));
    }
}

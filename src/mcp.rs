//! MCP tool bridge.
//!
//! Adapts the silo manager and query engine into an MCP Streamable HTTP
//! endpoint so external agents (Cursor, Claude, and other MCP-compatible
//! clients) can call `search`/`status`/`activity` as tools.
//!
//! Grounded on the teacher's `crates/context-harness/src/mcp.rs`
//! (`ServerHandler` shape, `list_tools`/`call_tool`, JSON-schema tool
//! descriptors) — that file is unbuilt in the teacher repo (an orphaned
//! alternate workspace member), so only its idiom is reused here, not its
//! code. Unlike the teacher, this bridge exposes no prompts: the engine
//! has no agent registry, only search and admin operations.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::json;

use crate::models::SearchWeights;
use crate::search::{self, SiloSearchContext};
use crate::silo_manager::SiloManager;

/// Bridges the silo manager to the MCP JSON-RPC protocol. Every MCP
/// session receives a clone (the manager itself is behind `Arc`), so all
/// sessions observe the same silos.
#[derive(Clone)]
pub struct McpBridge {
    manager: Arc<SiloManager>,
}

impl McpBridge {
    pub fn new(manager: Arc<SiloManager>) -> Self {
        McpBridge { manager }
    }

    fn tool_descriptors() -> Vec<Tool> {
        vec![
            Tool {
                name: Cow::Borrowed("search"),
                title: None,
                description: Some(Cow::Borrowed(
                    "Hybrid search over one or all silos: fuses semantic, BM25, trigram, \
                     filepath, and tag signals via reciprocal rank fusion.",
                )),
                input_schema: Arc::new(
                    json!({
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "silo": {"type": "string", "description": "restrict to one silo"},
                            "max_results": {"type": "integer", "default": 10},
                            "weights": {
                                "type": "string",
                                "enum": ["balanced", "semantic", "keyword", "code"],
                                "default": "balanced"
                            }
                        },
                        "required": ["query"]
                    })
                    .as_object()
                    .unwrap()
                    .clone(),
                ),
                output_schema: None,
                annotations: Some(ToolAnnotations::new().read_only(true)),
                execution: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: Cow::Borrowed("status"),
                title: None,
                description: Some(Cow::Borrowed(
                    "Report indexed file/chunk counts, database size, watcher state, and any \
                     error for every configured silo.",
                )),
                input_schema: Arc::new(serde_json::Map::new()),
                output_schema: None,
                annotations: Some(ToolAnnotations::new().read_only(true)),
                execution: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: Cow::Borrowed("activity"),
                title: None,
                description: Some(Cow::Borrowed(
                    "List the most recent indexing activity events across all silos.",
                )),
                input_schema: Arc::new(
                    json!({
                        "type": "object",
                        "properties": {
                            "limit": {"type": "integer", "default": 50}
                        }
                    })
                    .as_object()
                    .unwrap()
                    .clone(),
                ),
                output_schema: None,
                annotations: Some(ToolAnnotations::new().read_only(true)),
                execution: None,
                icons: None,
                meta: None,
            },
        ]
    }

    async fn call_search(&self, args: serde_json::Value) -> Result<serde_json::Value, anyhow::Error> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required field: query"))?;
        let silo_filter = args.get("silo").and_then(|v| v.as_str());
        let max_results = args.get("max_results").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let weights = args
            .get("weights")
            .and_then(|v| v.as_str())
            .and_then(SearchWeights::by_name)
            .unwrap_or_default();

        let names = match silo_filter {
            Some(name) => vec![name.to_string()],
            None => self.manager.silo_names().await,
        };

        let mut pools = Vec::new();
        let mut embedders = Vec::new();
        for name in &names {
            pools.push((name.clone(), self.manager.pool(name).await?));
            embedders.push(self.manager.embedder(name).await?);
        }
        let contexts: Vec<SiloSearchContext> = pools
            .iter()
            .zip(embedders.iter())
            .map(|((name, pool), embedder)| SiloSearchContext {
                name,
                pool,
                embedder: embedder.as_ref(),
            })
            .collect();

        let results = search::search(&contexts, query, weights, max_results).await?;
        Ok(serde_json::to_value(results)?)
    }

    async fn call_status(&self) -> Result<serde_json::Value, anyhow::Error> {
        let mut statuses = Vec::new();
        for name in self.manager.silo_names().await {
            let status = self.manager.status(&name).await?;
            statuses.push(json!({
                "name": status.name,
                "state": format!("{:?}", status.state).to_lowercase(),
                "fileCount": status.file_count,
                "chunkCount": status.chunk_count,
                "dbSizeBytes": status.db_size_bytes,
                "modelMismatch": status.model_mismatch,
                "resolvedModel": status.resolved_model,
                "errorMessage": status.error_message,
            }));
        }
        Ok(json!({ "silos": statuses }))
    }

    async fn call_activity(&self, args: serde_json::Value) -> Result<serde_json::Value, anyhow::Error> {
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
        let events = self.manager.recent_activity(limit).await;
        Ok(serde_json::to_value(events)?)
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "silo-engine".to_string(),
                title: Some("Silo Engine".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "A local multi-silo hybrid search engine. Use `search` to query indexed \
                 silos, `status` to check indexing progress and errors, and `activity` to \
                 see recent indexing events."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tool_descriptors())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tool_descriptors().into_iter().find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let result = match request.name.as_ref() {
            "search" => self.call_search(args).await,
            "status" => self.call_status().await,
            "activity" => self.call_activity(args).await,
            other => {
                return Err(McpError::new(
                    ErrorCode::METHOD_NOT_FOUND,
                    format!("no tool registered with name: {other}"),
                    None,
                ))
            }
        };

        match result {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

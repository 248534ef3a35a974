use duckpipe_core::{Error, SafeSearch, ToolOutput, MAX_PAGE, MAX_TOOL_PAGE_SIZE};
use duckpipe_local::{DuckDuckGoTools, EnvConfig, SearchArgs, ToolContext};
use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, RoleServer, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod envelope;
use envelope::*;

const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct SearchToolArgs {
    /// Search query (required, non-empty).
    query: Option<String>,
    /// Results per page, 1-10 (default 5). A host-pinned DUCKPIPE_PAGE_SIZE wins.
    #[schemars(with = "Option<u32>")]
    page_size: Option<serde_json::Value>,
    /// strict | moderate | off (default moderate). A host-pinned DUCKPIPE_SAFE_SEARCH wins.
    safe_search: Option<String>,
    /// 1-based result page, 1-100 (default 1).
    #[schemars(with = "Option<u32>")]
    page: Option<serde_json::Value>,
}

/// Integer argument in `1..=max`. Numbers out of range, fractions, strings and
/// other JSON all become the same invalid-params message; `null` means unset.
fn bounded_int<T: TryFrom<u64>>(
    value: Option<serde_json::Value>,
    name: &str,
    max: u64,
) -> Result<Option<T>, String> {
    let invalid =
        || Error::InvalidParams(format!("{name} must be within 1..={max}")).to_tool_message();
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|n| (1..=max).contains(n))
            .and_then(|n| T::try_from(n).ok())
            .map(Some)
            .ok_or_else(invalid),
    }
}

impl SearchToolArgs {
    /// Tool-call JSON to `SearchArgs`; a bad `safe_search`, `page_size` or `page`
    /// becomes the error string.
    fn into_search_args(self) -> Result<SearchArgs, String> {
        let page_size = bounded_int(self.page_size, "page_size", MAX_TOOL_PAGE_SIZE as u64)?;
        let page = bounded_int(self.page, "page", u64::from(MAX_PAGE))?;
        let safe_search = match self.safe_search.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(
                s.parse::<SafeSearch>()
                    .map_err(|e| e.to_tool_message())?,
            ),
        };
        Ok(SearchArgs {
            query: self.query.unwrap_or_default(),
            page_size,
            safe_search,
            page,
        })
    }
}

#[derive(Clone)]
pub(crate) struct DuckpipeMcp {
    tool_router: RmcpToolRouter<Self>,
    tools: DuckDuckGoTools,
    download_dir: Option<PathBuf>,
}

#[tool_router]
impl DuckpipeMcp {
    pub(crate) fn new(download_dir: Option<PathBuf>) -> Result<Self, McpError> {
        let tools = DuckDuckGoTools::from_env()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(Self {
            tool_router: Self::tool_router(),
            tools,
            download_dir,
        })
    }

    fn context(&self, cancel: CancellationToken) -> ToolContext {
        ToolContext::new()
            .with_config(Arc::new(EnvConfig))
            .with_cancel(cancel)
            .with_working_dir(self.download_dir.clone())
    }

    #[tool(
        description = "Search the web via DuckDuckGo. Returns { links: [[label, url]], count } or a message string."
    )]
    async fn web_search(
        &self,
        params: Parameters<Option<SearchToolArgs>>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let out = match params.0.unwrap_or_default().into_search_args() {
            Ok(args) => {
                self.tools
                    .web_search(args, &self.context(context.ct.clone()))
                    .await
            }
            Err(msg) => ToolOutput::message(msg),
        };
        let elapsed_ms = t0.elapsed().as_millis();
        tracing::debug!(tool = "web_search", elapsed_ms = elapsed_ms as u64, error = out.is_error(), "tool call finished");
        Ok(tool_result(&out, "web_search", elapsed_ms))
    }

    #[tool(
        description = "Search images via DuckDuckGo (jpg/jpeg/png/gif only). Returns local file paths when the server has a download directory, otherwise image URLs."
    )]
    async fn image_search(
        &self,
        params: Parameters<Option<SearchToolArgs>>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let out = match params.0.unwrap_or_default().into_search_args() {
            Ok(args) => {
                self.tools
                    .image_search(args, &self.context(context.ct.clone()))
                    .await
            }
            Err(msg) => ToolOutput::message(msg),
        };
        let elapsed_ms = t0.elapsed().as_millis();
        tracing::debug!(tool = "image_search", elapsed_ms = elapsed_ms as u64, error = out.is_error(), "tool call finished");
        Ok(tool_result(&out, "image_search", elapsed_ms))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for DuckpipeMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "DuckDuckGo web and image search. Requests are rate limited (one every 2s by default); results are plain strings or small JSON payloads."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio(download_dir: Option<PathBuf>) -> Result<(), McpError> {
    tracing::info!(download_dir = ?download_dir, "starting MCP stdio server");
    let svc = DuckpipeMcp::new(download_dir)?;
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    tracing::info!("MCP client closed the session");
    Ok(())
}

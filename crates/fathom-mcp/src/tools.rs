//! MCP tool definitions for Fathom.
//!
//! Each tool is annotated with `#[tool]` and maps 1:1 onto one command of
//! the engine's surface. This crate is a thin adapter: parameter parsing
//! and result formatting live here, all semantics live in `fathom-core`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
    ErrorData as McpError, ServerHandler,
};
use serde::Deserialize;

use fathom_core::types::{AnnotationSource, DiffWindow, SearchRequest};
use fathom_core::{Engine, FathomError};

// -----------------------------------------------------------------------
// Parameter structs for each tool
// -----------------------------------------------------------------------

/// Parameters for the search tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchParams {
    /// Natural-language query.
    pub query: String,
    /// Container to search (active container when omitted).
    pub container: Option<String>,
    /// Maximum results (default 10, max 50).
    pub top_k: Option<usize>,
    /// Extension allow-list, e.g. ["md", "rs"].
    pub file_extensions: Option<Vec<String>>,
    /// Only return results under this path prefix.
    pub path_prefix: Option<String>,
    /// Snippet length in bytes (max 10000).
    pub context_bytes: Option<usize>,
    /// Drop results scoring below this threshold (0-100).
    pub min_score: Option<f32>,
}

/// Parameters for index_folder.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IndexFolderParams {
    /// Directory to register and index.
    pub path: String,
}

/// Parameters for container-scoped commands.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ContainerParams {
    /// Container name (active container when omitted).
    pub container: Option<String>,
}

/// Parameters for read_file.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReadFileParams {
    /// Absolute path; must lie under an indexed root.
    pub path: String,
    /// First line to read (1-based, inclusive).
    pub start_line: Option<usize>,
    /// Last line to read (1-based, inclusive).
    pub end_line: Option<usize>,
}

/// Parameters for list_files.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListFilesParams {
    /// Container name (active container when omitted).
    pub container: Option<String>,
    /// Only list paths under this prefix.
    pub path_prefix: Option<String>,
    /// Extension allow-list.
    pub extensions: Option<Vec<String>>,
}

/// Parameters for diff.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DiffParams {
    /// Time window: one of "30m", "2h", "1d", "7d".
    pub window: String,
    /// Include a short preview per changed file.
    pub previews: Option<bool>,
}

/// Parameters for related.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RelatedParams {
    /// Path whose neighbours to find.
    pub path: String,
    /// Maximum results (default 10, max 30).
    pub top_k: Option<usize>,
}

/// Parameters for add_annotation.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AddAnnotationParams {
    /// Path the note is about.
    pub path: String,
    /// Note text.
    pub note: String,
    /// Container name (active container when omitted).
    pub container: Option<String>,
}

/// Parameters for delete_annotation.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteAnnotationParams {
    /// Annotation id.
    pub id: String,
    /// Container name (active container when omitted).
    pub container: Option<String>,
}

/// Parameters for get_annotations.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetAnnotationsParams {
    /// Restrict to one path (all annotations when omitted).
    pub path: Option<String>,
    /// Container name (active container when omitted).
    pub container: Option<String>,
}

/// Parameters for create_container.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateContainerParams {
    /// Unique container name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Root paths to register immediately.
    pub roots: Option<Vec<String>>,
}

/// Parameters for commands naming a container explicitly.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NamedContainerParams {
    /// Container name.
    pub name: String,
}

// -----------------------------------------------------------------------
// MCP Server
// -----------------------------------------------------------------------

/// Fathom MCP server.
///
/// Exposes the semantic file index to AI agents.
#[derive(Clone)]
pub struct FathomServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

fn to_mcp_error(e: FathomError) -> McpError {
    match e {
        FathomError::NotFound { .. } | FathomError::BadInput { .. } => {
            McpError::invalid_params(e.to_string(), None)
        }
        _ => McpError::internal_error(e.to_string(), None),
    }
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool_router]
impl FathomServer {
    /// Create a new MCP server backed by the given engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "search",
        description = "Search indexed files with hybrid retrieval (semantic + keyword). Returns ranked paths with snippets and scores in [0, 100]. Use natural language, e.g. 'invoice about server costs'."
    )]
    async fn search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let request = SearchRequest {
            query: p.query,
            container: p.container,
            top_k: p.top_k,
            file_extensions: p.file_extensions,
            path_prefix: p.path_prefix.map(PathBuf::from),
            context_bytes: p.context_bytes,
            min_score: p.min_score,
        };
        let hits = self.engine.search(&request).await.map_err(to_mcp_error)?;
        if hits.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No results. Make sure a folder has been indexed with the index_folder tool.",
            )]));
        }
        json_result(&hits)
    }

    #[tool(
        name = "index_folder",
        description = "Register a directory as an indexed root of the active container and index its contents. Returns job counts."
    )]
    async fn index_folder(
        &self,
        params: Parameters<IndexFolderParams>,
    ) -> Result<CallToolResult, McpError> {
        let summary = self
            .engine
            .index_folder(Path::new(&params.0.path))
            .await
            .map_err(to_mcp_error)?;
        json_result(&summary)
    }

    #[tool(
        name = "reindex_all",
        description = "Clear a container and rebuild it from all of its roots."
    )]
    async fn reindex_all(
        &self,
        params: Parameters<ContainerParams>,
    ) -> Result<CallToolResult, McpError> {
        let summary = self
            .engine
            .reindex_all(params.0.container.as_deref())
            .await
            .map_err(to_mcp_error)?;
        json_result(&summary)
    }

    #[tool(
        name = "reset_index",
        description = "Drop all indexed rows of a container without removing its registration."
    )]
    async fn reset_index(
        &self,
        params: Parameters<ContainerParams>,
    ) -> Result<CallToolResult, McpError> {
        self.engine
            .reset_index(params.0.container.as_deref())
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text("ok")]))
    }

    #[tool(
        name = "read_file",
        description = "Read a file (or a line range of it) that lies under an indexed root. Paths outside all indexed roots are refused."
    )]
    async fn read_file(
        &self,
        params: Parameters<ReadFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let range = match (p.start_line, p.end_line) {
            (Some(start), Some(end)) => Some((start, end)),
            (None, None) => None,
            _ => {
                return Err(McpError::invalid_params(
                    "start_line and end_line must be given together",
                    None,
                ))
            }
        };
        let text = self
            .engine
            .read_file(Path::new(&p.path), range)
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        name = "list_files",
        description = "List the deduplicated indexed paths of a container with file sizes, optionally filtered by prefix and extensions."
    )]
    async fn list_files(
        &self,
        params: Parameters<ListFilesParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let listings = self
            .engine
            .list_files(
                p.container.as_deref(),
                p.path_prefix.as_deref().map(Path::new),
                p.extensions.as_deref(),
            )
            .map_err(to_mcp_error)?;
        json_result(&listings)
    }

    #[tool(
        name = "index_status",
        description = "Counts, indexed roots, and provider label for a container."
    )]
    async fn index_status(
        &self,
        params: Parameters<ContainerParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = self
            .engine
            .index_status(params.0.container.as_deref())
            .map_err(to_mcp_error)?;
        json_result(&status)
    }

    #[tool(
        name = "diff",
        description = "Recently changed indexed paths within a time window (30m, 2h, 1d, or 7d), optionally with previews."
    )]
    async fn diff(&self, params: Parameters<DiffParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let window = DiffWindow::parse(&p.window).ok_or_else(|| {
            McpError::invalid_params("window must be one of 30m, 2h, 1d, 7d", None)
        })?;
        let entries = self
            .engine
            .diff(window, p.previews.unwrap_or(false))
            .map_err(to_mcp_error)?;
        json_result(&entries)
    }

    #[tool(
        name = "related",
        description = "Paths nearest to a given file in embedding space (max 30)."
    )]
    async fn related(
        &self,
        params: Parameters<RelatedParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let hits = self
            .engine
            .related(Path::new(&p.path), p.top_k.unwrap_or(10))
            .await
            .map_err(to_mcp_error)?;
        json_result(&hits)
    }

    #[tool(name = "list_containers", description = "All containers with their active flag.")]
    async fn list_containers(&self) -> Result<CallToolResult, McpError> {
        let containers: Vec<serde_json::Value> = self
            .engine
            .list_containers()
            .into_iter()
            .map(|(meta, active)| {
                serde_json::json!({
                    "name": meta.name,
                    "description": meta.description,
                    "provider": meta.provider_identity.label(),
                    "roots": meta.roots,
                    "active": active,
                })
            })
            .collect();
        json_result(&containers)
    }

    #[tool(
        name = "add_annotation",
        description = "Attach a note to a file path. The note is embedded and searchable; it outlives the file until explicitly removed."
    )]
    async fn add_annotation(
        &self,
        params: Parameters<AddAnnotationParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let annotation = self
            .engine
            .add_annotation(
                p.container.as_deref(),
                Path::new(&p.path),
                &p.note,
                AnnotationSource::Agent,
            )
            .await
            .map_err(to_mcp_error)?;
        json_result(&annotation)
    }

    #[tool(name = "delete_annotation", description = "Remove an annotation by id.")]
    async fn delete_annotation(
        &self,
        params: Parameters<DeleteAnnotationParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        self.engine
            .delete_annotation(p.container.as_deref(), &p.id)
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text("ok")]))
    }

    #[tool(
        name = "get_annotations",
        description = "List annotations of a container, optionally for one path."
    )]
    async fn get_annotations(
        &self,
        params: Parameters<GetAnnotationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let annotations = self
            .engine
            .get_annotations(p.container.as_deref(), p.path.as_deref().map(Path::new))
            .map_err(to_mcp_error)?;
        json_result(&annotations)
    }

    #[tool(
        name = "create_container",
        description = "Create an isolated index bound to the current embedding provider. The provider binding is immutable afterwards."
    )]
    async fn create_container(
        &self,
        params: Parameters<CreateContainerParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let roots = p
            .roots
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let meta = self
            .engine
            .create_container(&p.name, p.description.as_deref().unwrap_or(""), None, roots)
            .map_err(to_mcp_error)?;
        json_result(&meta)
    }

    #[tool(
        name = "delete_container",
        description = "Delete a container and drop all of its indexed data. The Default container cannot be deleted."
    )]
    async fn delete_container(
        &self,
        params: Parameters<NamedContainerParams>,
    ) -> Result<CallToolResult, McpError> {
        self.engine
            .delete_container(&params.0.name)
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text("ok")]))
    }

    #[tool(name = "set_active_container", description = "Switch the active container.")]
    async fn set_active_container(
        &self,
        params: Parameters<NamedContainerParams>,
    ) -> Result<CallToolResult, McpError> {
        self.engine
            .set_active_container(&params.0.name)
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text("ok")]))
    }
}

#[tool_handler]
impl ServerHandler for FathomServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Fathom is a local-first semantic file index. Use index_folder to register \
                 directories, search for hybrid retrieval over their contents, read_file to \
                 fetch exact text, and add_annotation to leave searchable notes on files."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

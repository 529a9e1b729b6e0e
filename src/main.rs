//! Composition root: CLI argument parsing, logging initialization, and a
//! thin `rmcp` MCP server that wires a handful of tool handlers onto
//! [`lsmcp::index::SymbolIndex`]'s public API. Everything else lives in
//! the library; this binary only assembles it and serves it over stdio.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use url::Url;
use walkdir::WalkDir;

use lsmcp::cache::PersistentCache;
use lsmcp::fs::RealFileSystem;
use lsmcp::index::{IndexFilesOptions, SymbolIndex, UpdateIncrementalOptions};
use lsmcp::logging::init_logger;
use lsmcp::lsp::client::LspClient;
use lsmcp::model::query::SymbolQuery;
use lsmcp::model::symbol::SymbolKind;
use lsmcp::provider::lsp_provider::LspSymbolProvider;
use lsmcp::vcs::GitProbe;

/// Extensions the index refreshes against during incremental updates,
/// per `spec.md` §4.4.6 step 4's "recognized extensions" filter.
const DEFAULT_EXTENSIONS: &[&str] =
    &["rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "pyi", "java", "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "go"];

#[derive(Parser, Debug)]
#[command(version, about = "MCP server exposing code-intelligence operations over a persistent, LSP-backed workspace symbol index")]
struct Args {
    /// Root of the workspace to index. Defaults to the current directory.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Command used to launch the backing language server (e.g. "rust-analyzer").
    #[arg(long)]
    lsp_command: String,

    /// Arguments passed to the language server command.
    #[arg(long, value_delimiter = ',')]
    lsp_args: Vec<String>,

    /// Comma-separated file extensions recognized during incremental refresh.
    #[arg(long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// Timeout, in seconds, for individual LSP requests.
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, help = "Set the logging level for the server", value_parser = ["error", "warn", "info", "debug", "trace"])]
    log_level: Option<String>,

    #[arg(long, help = "Disable ANSI color output")]
    no_color: bool,

    /// Watch the workspace for file changes and reindex touched files as
    /// they happen, in addition to explicit `index_files`/
    /// `update_incremental` tool calls. Ambient and off by default.
    #[arg(long)]
    watch: bool,
}

/// Watches `workspace_root` recursively and reindexes any changed file
/// whose extension is in `extensions`. The returned watcher must be
/// kept alive for the duration of the watch; dropping it stops delivery.
///
/// Purely an ambient, composition-root concern (`SPEC_FULL.md` §4): the
/// index itself has no notion of a live filesystem watch, only of
/// `index_file`/`remove_file` calls.
fn spawn_file_watcher(
    index: SymbolIndex,
    workspace_root: PathBuf,
    extensions: Vec<String>,
) -> notify::Result<RecommendedWatcher> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<notify::Event>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;
    watcher.watch(&workspace_root, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            for path in event.paths {
                let Ok(relative) = path.strip_prefix(&workspace_root) else { continue };
                let recognized = Path::new(relative)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
                    .unwrap_or(false);
                if !recognized {
                    continue;
                }
                let relative_str = relative.to_string_lossy().into_owned();
                if tokio::fs::metadata(&path).await.is_ok() {
                    if let Err(e) = index.index_file(&relative_str).await {
                        tracing::warn!(path = %relative_str, error = %e, "file-watch triggered reindex failed");
                    }
                } else if let Err(e) = index.remove_file(&relative_str).await {
                    tracing::warn!(path = %relative_str, error = %e, "file-watch triggered removal failed");
                }
            }
        }
    });

    Ok(watcher)
}

/// Walks `workspace_root` recursively and returns every file whose
/// extension is in `extensions`, relative to `workspace_root`. Used to seed
/// a full index without the caller having to enumerate paths itself.
fn discover_workspace_files(workspace_root: &Path, extensions: &[String]) -> Vec<String> {
    WalkDir::new(workspace_root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git" && entry.file_name() != ".lsmcp")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let recognized = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false);
            if !recognized {
                return None;
            }
            entry.path().strip_prefix(workspace_root).ok().map(|p| p.to_string_lossy().into_owned())
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.no_color, args.log_level.as_deref())?;

    let workspace_root = args.workspace.canonicalize().unwrap_or(args.workspace.clone());
    tracing::info!(workspace = %workspace_root.display(), "starting lsmcp");

    let extensions = if args.extensions.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    } else {
        args.extensions.clone()
    };

    let request_timeout = Duration::from_secs(args.request_timeout_secs);
    let client = LspClient::spawn(&args.lsp_command, &args.lsp_args, request_timeout)?;
    let workspace_uri = Url::from_directory_path(&workspace_root)
        .map_err(|_| anyhow::anyhow!("workspace root is not a representable file path"))?;
    client.start(&[workspace_uri]).await?;

    let fs = Arc::new(RealFileSystem);
    let provider = Arc::new(LspSymbolProvider::new(client.clone(), fs.clone()).with_request_timeout(request_timeout));
    let cache = Arc::new(PersistentCache::open(&workspace_root)?);
    let vcs = Arc::new(GitProbe::new(&workspace_root));

    if cache.requires_reindexing() {
        tracing::warn!("cache schema was upgraded; a full reindex is required");
    }

    let index = SymbolIndex::new(workspace_root.clone(), provider, cache, vcs, fs, extensions.clone());

    let _watcher = if args.watch {
        match spawn_file_watcher(index.clone(), workspace_root.clone(), extensions.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start workspace file watcher; continuing without it");
                None
            }
        }
    } else {
        None
    };

    let server = LsmcpServer::new(index, workspace_root, extensions);
    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("MCP serve error: {e}"))?;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            result = service.waiting() => { result.map_err(|e| anyhow::anyhow!("MCP runtime error: {e}"))?; }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        service.waiting().await.map_err(|e| anyhow::anyhow!("MCP runtime error: {e}"))?;
    }

    client.stop().await.ok();
    Ok(())
}

#[derive(Debug, Deserialize, JsonSchema)]
struct IndexFilesParams {
    /// Paths to index, relative to the workspace root or absolute.
    paths: Vec<String>,
    /// Whether a single failing file should abort the batch.
    #[serde(default)]
    skip_failures: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct QuerySymbolsParams {
    /// Case-sensitive substring match against a symbol's name.
    name: Option<String>,
    /// Symbol kinds to filter by, e.g. `["class", "method"]`.
    kind: Option<Vec<String>>,
    /// Restrict the search to a single file.
    file: Option<String>,
    /// Exact match against a symbol's container name.
    container_name: Option<String>,
    /// Whether to descend into matched subtrees and non-matching subtrees alike. Defaults to true.
    #[serde(default = "default_true")]
    include_children: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RemoveFileParams {
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateIncrementalParams {}

#[derive(Debug, Deserialize, JsonSchema)]
struct StatsParams {}

#[derive(Debug, Deserialize, JsonSchema)]
struct IndexWorkspaceParams {
    /// Whether a single failing file should abort the scan.
    #[serde(default)]
    skip_failures: bool,
}

/// MCP facade over [`SymbolIndex`]. Cheap to clone: holds only the
/// index handle, the workspace root and recognized extensions (for
/// the `index_workspace` full-scan tool), and its own tool router.
#[derive(Clone)]
struct LsmcpServer {
    index: SymbolIndex,
    workspace_root: PathBuf,
    extensions: Vec<String>,
    tool_router: ToolRouter<Self>,
}

impl LsmcpServer {
    fn new(index: SymbolIndex, workspace_root: PathBuf, extensions: Vec<String>) -> Self {
        Self { index, workspace_root, extensions, tool_router: Self::tool_router() }
    }
}

#[tool_router]
impl LsmcpServer {
    #[tool(description = "Index or re-index a list of workspace files, populating the symbol cache.")]
    async fn index_files(&self, Parameters(params): Parameters<IndexFilesParams>) -> Result<CallToolResult, McpError> {
        let options = IndexFilesOptions::new(params.skip_failures);
        let report = self
            .index
            .index_files(&params.paths, options)
            .await
            .map_err(|e| McpError::internal_error(format!("index_files failed: {e}"), None))?;
        let output = serde_json::to_string(&report)
            .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        description = "Refresh the index against the current git state: re-indexes files changed or untracked since the last update and drops files deleted from disk."
    )]
    async fn update_incremental(
        &self,
        Parameters(_params): Parameters<UpdateIncrementalParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = self.index.update_incremental(UpdateIncrementalOptions::default()).await;
        let output = serde_json::to_string(&result)
            .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        description = "Query indexed symbols by name substring, kind, file, or container. Omit a field to leave it unconstrained."
    )]
    async fn query_symbols(&self, Parameters(params): Parameters<QuerySymbolsParams>) -> Result<CallToolResult, McpError> {
        let mut query = SymbolQuery::new().with_include_children(params.include_children);
        if let Some(name) = params.name {
            query = query.with_name(name);
        }
        if let Some(kinds) = params.kind {
            let kinds = SymbolKind::parse_many(&kinds)
                .map_err(|e| McpError::invalid_params(format!("invalid symbol kind: {e}"), None))?;
            query = query.with_kind(kinds);
        }
        if let Some(file) = params.file {
            query = query.with_file(file);
        }
        if let Some(container_name) = params.container_name {
            query = query.with_container_name(container_name);
        }

        let results = self.index.query_symbols(&query).await;
        let output = serde_json::to_string(&results)
            .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        description = "Discover every recognized-extension file under the workspace root and index it. Use for the initial full index; prefer `update_incremental` afterwards."
    )]
    async fn index_workspace(
        &self,
        Parameters(params): Parameters<IndexWorkspaceParams>,
    ) -> Result<CallToolResult, McpError> {
        let workspace_root = self.workspace_root.clone();
        let extensions = self.extensions.clone();
        let paths = tokio::task::spawn_blocking(move || discover_workspace_files(&workspace_root, &extensions))
            .await
            .map_err(|e| McpError::internal_error(format!("workspace scan panicked: {e}"), None))?;

        let options = IndexFilesOptions::new(params.skip_failures);
        let report = self
            .index
            .index_files(&paths, options)
            .await
            .map_err(|e| McpError::internal_error(format!("index_workspace failed: {e}"), None))?;
        let output = serde_json::to_string(&report)
            .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(description = "Remove a file's symbols from the index.")]
    async fn remove_file(&self, Parameters(params): Parameters<RemoveFileParams>) -> Result<CallToolResult, McpError> {
        self.index
            .remove_file(&params.path)
            .await
            .map_err(|e| McpError::internal_error(format!("remove_file failed: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(format!("removed {}", params.path))]))
    }

    #[tool(description = "Report aggregate index statistics: file and symbol counts, cache hit rate, last update time.")]
    async fn stats(&self, Parameters(_params): Parameters<StatsParams>) -> Result<CallToolResult, McpError> {
        let stats = self.index.stats().await;
        let output = serde_json::to_string(&stats)
            .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }
}

#[tool_handler]
impl ServerHandler for LsmcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Code-intelligence server backed by a persistent, LSP-derived workspace symbol index.\n\n\
                 Tools:\n\
                 - `index_files`: index or re-index specific files.\n\
                 - `index_workspace`: discover and index every recognized file under the workspace root.\n\
                 - `update_incremental`: refresh the index against current git changes.\n\
                 - `query_symbols`: search indexed symbols by name, kind, file, or container.\n\
                 - `remove_file`: drop a file's symbols from the index.\n\
                 - `stats`: aggregate index statistics."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

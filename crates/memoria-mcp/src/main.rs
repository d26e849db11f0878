//! memoria-mcp: a Model Context Protocol server exposing the layered memory
//! kernel to agents over stdio JSON-RPC, with an optional versioned HTTP API
//! for out-of-process callers.

mod protocol;
mod server;
mod state;
mod tools;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use memoria_core::config::YamlIdentityConfig;
use memoria_core::embeddings::EmbeddingProvider;
#[cfg(feature = "embeddings")]
use memoria_core::embeddings::LocalEmbeddingProvider;
use memoria_core::safety::FilterAction;
use memoria_core::{
    BudgetConfig, ContextBudgetManager, IdentityChangeStore, IdentityConfigSource, MemoryKernel, PendingQueueStore,
    ProjectPaths, SafetyConfig, SafetyFilter, VectorIndex,
};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::state::AppState;

const DEFAULT_PROJECT_ID: &str = "default";

struct CliArgs {
    project_id: String,
    data_dir: Option<PathBuf>,
    http: bool,
    vector_index_url: Option<String>,
}

/// Parses CLI arguments, exiting the process on `--help`/`--version`.
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut project_id = DEFAULT_PROJECT_ID.to_string();
    let mut data_dir: Option<PathBuf> = None;
    let mut http = false;
    let mut vector_index_url = std::env::var("MEMORIA_QDRANT_URL").ok();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("memoria-mcp {}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Layered memory server for long-running agents, speaking MCP over stdio.");
                println!();
                println!("USAGE:");
                println!("    memoria-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --project-id <ID>       Namespace for on-disk state (default: \"default\")");
                println!("    --data-dir <PATH>       Override the project data directory");
                println!("    --http                  Also serve the versioned HTTP API");
                println!("    --vector-index-url <URL>  Use a remote Qdrant collection instead of the embedded index");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (e.g., debug, info, warn, error)");
                println!("    MEMORIA_API_KEY         Bearer/API key required on mutating HTTP endpoints");
                println!("    MEMORIA_HTTP_ADDR       HTTP bind address (default: 127.0.0.1:3900)");
                println!("    MEMORIA_QDRANT_URL      Same as --vector-index-url");
                println!("    MEMORIA_BUDGET_*        Per-layer and total token budget overrides");
                println!("    MEMORIA_SAFETY_*        Safety filter overrides");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("memoria-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--project-id" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --project-id requires a value");
                    std::process::exit(1);
                }
                project_id = args[i].clone();
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            "--http" => http = true,
            "--vector-index-url" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --vector-index-url requires a value");
                    std::process::exit(1);
                }
                vector_index_url = Some(args[i].clone());
            }
            arg if arg.starts_with("--vector-index-url=") => {
                let url = arg.strip_prefix("--vector-index-url=").unwrap_or("");
                if url.is_empty() {
                    eprintln!("error: --vector-index-url requires a value");
                    std::process::exit(1);
                }
                vector_index_url = Some(url.to_string());
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'memoria-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    CliArgs { project_id, data_dir, http, vector_index_url }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn budget_from_env(defaults: BudgetConfig) -> BudgetConfig {
    BudgetConfig {
        identity_schema: env_u32("MEMORIA_BUDGET_IDENTITY_SCHEMA").unwrap_or(defaults.identity_schema),
        active_context: env_u32("MEMORIA_BUDGET_ACTIVE_CONTEXT").unwrap_or(defaults.active_context),
        event_log: env_u32("MEMORIA_BUDGET_EVENT_LOG").unwrap_or(defaults.event_log),
        verified_fact: env_u32("MEMORIA_BUDGET_VERIFIED_FACT").unwrap_or(defaults.verified_fact),
        operational_knowledge: env_u32("MEMORIA_BUDGET_OPERATIONAL_KNOWLEDGE").unwrap_or(defaults.operational_knowledge),
        total: env_u32("MEMORIA_BUDGET_TOTAL").unwrap_or(defaults.total),
    }
}

fn safety_from_env(defaults: SafetyConfig) -> SafetyConfig {
    let max_length = std::env::var("MEMORIA_SAFETY_MAX_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_length);

    let pii_action = match std::env::var("MEMORIA_SAFETY_PII_ACTION").ok().as_deref() {
        Some("allow") => FilterAction::Allow,
        Some("warn") => FilterAction::Warn,
        Some("redact") => FilterAction::Redact,
        Some("block") => FilterAction::Block,
        _ => defaults.pii_action,
    };

    let sensitive_words = std::env::var("MEMORIA_SAFETY_SENSITIVE_WORDS")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or(defaults.sensitive_words);

    SafetyConfig { max_length, pii_action, sensitive_words, custom_patterns: defaults.custom_patterns }
}

fn build_embedder() -> Arc<dyn EmbeddingProvider> {
    #[cfg(feature = "embeddings")]
    {
        let provider = LocalEmbeddingProvider::new();
        if let Err(e) = provider.warm_up() {
            error!("failed to initialize local embedding model: {e}");
            std::process::exit(1);
        }
        return Arc::new(provider);
    }

    #[cfg(not(feature = "embeddings"))]
    {
        error!("no embedding provider compiled in; rebuild with the `embeddings` feature");
        std::process::exit(1);
    }
}

/// Picks the vector index backend at startup: a remote Qdrant collection
/// when `vector_index_url` is set (the production default, per §7's
/// "Remote-index" row — no silent fallback to the embedded mode on
/// connection failure), otherwise the embedded on-disk index.
fn build_vector_index(paths: &ProjectPaths, dimensions: usize, project_id: &str, vector_index_url: Option<&str>) -> Arc<dyn VectorIndex> {
    if let Some(url) = vector_index_url {
        #[cfg(feature = "remote-index")]
        {
            match memoria_core::RemoteVectorIndex::connect(url, project_id, dimensions) {
                Ok(index) => return Arc::new(index),
                Err(e) => {
                    error!("failed to connect to remote vector index at {url}: {e}");
                    std::process::exit(1);
                }
            }
        }

        #[cfg(not(feature = "remote-index"))]
        {
            error!("--vector-index-url was given but this binary was built without the `remote-index` feature");
            std::process::exit(1);
        }
    }

    #[cfg(feature = "vector-search")]
    {
        match memoria_core::EmbeddedVectorIndex::open(&paths.vector_index_dir(), dimensions) {
            Ok(index) => return Arc::new(index),
            Err(e) => {
                error!("failed to open embedded vector index: {e}");
                std::process::exit(1);
            }
        }
    }

    #[cfg(not(feature = "vector-search"))]
    {
        error!("no vector index backend compiled in; rebuild with `vector-search` or pass --vector-index-url with `remote-index`");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("memoria-mcp v{} starting (project_id={})", env!("CARGO_PKG_VERSION"), args.project_id);

    let paths = match ProjectPaths::resolve(&args.project_id, args.data_dir.clone()) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to resolve project paths: {e}");
            std::process::exit(1);
        }
    };

    let identity_config: Arc<dyn IdentityConfigSource> = Arc::new(YamlIdentityConfig::new(paths.constitution_yaml()));

    let pending_store = match PendingQueueStore::open(&paths.pending_memory_db()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open pending memory queue: {e}");
            std::process::exit(1);
        }
    };

    let identity_store = match IdentityChangeStore::open(&paths.identity_changes_db()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open identity change store: {e}");
            std::process::exit(1);
        }
    };

    let embedder = build_embedder();
    let vector_index = build_vector_index(&paths, embedder.dimensions(), &args.project_id, args.vector_index_url.as_deref());

    let safety = SafetyFilter::new(safety_from_env(SafetyConfig::default()));
    let budget = ContextBudgetManager::new(budget_from_env(BudgetConfig::default()));

    let kernel = match MemoryKernel::new(
        args.project_id.clone(),
        vector_index,
        embedder,
        pending_store,
        identity_config,
        safety,
        budget,
    ) {
        Ok(k) => Arc::new(k),
        Err(e) => {
            error!("failed to initialize memory kernel: {e}");
            std::process::exit(1);
        }
    };

    let api_key = std::env::var("MEMORIA_API_KEY").ok();
    let checklist_path = paths.root().join("checklist.json");
    let state = match AppState::new(kernel, identity_store, checklist_path, api_key) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to initialize application state: {e}");
            std::process::exit(1);
        }
    };

    #[cfg(feature = "http")]
    if args.http {
        let http_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = protocol::http::serve(http_state).await {
                error!("http server exited: {e}");
            }
        });
    }

    #[cfg(not(feature = "http"))]
    if args.http {
        error!("--http requested but this binary was built without the `http` feature");
        std::process::exit(1);
    }

    let server = McpServer::new(state);
    let transport = StdioTransport::new();
    if let Err(e) = transport.run(server).await {
        error!("stdio transport exited: {e}");
        std::process::exit(1);
    }
}

//! codegraph binary — thin CLI shell over the [`codegraph_server`] library.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use codegraph_server::session::Session;
use codegraph_server::tools::dispatch_tool;
use codegraph_server::types::CancelToken;
use codegraph_server::watch::run_watcher;
use codegraph_server::Router;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Persistent code knowledge graph engine for polyglot repositories.
#[derive(Parser)]
#[command(name = "codegraph", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Session root directory (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Cache directory override (default: $XDG_CACHE_HOME/codegraph)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index (or incrementally re-index) a repository
    Index {
        /// Repository path (default: session root)
        path: Option<PathBuf>,
    },
    /// Invoke a tool by name with a JSON argument object
    Tool {
        /// Tool name (e.g. search_graph, trace_call_path, query_graph)
        name: String,
        /// JSON arguments
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Watch all indexed projects and re-index on change
    Watch,
    /// List indexed projects
    List,
    /// Delete a project's database
    Delete {
        /// Project name
        project: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codegraph=info".parse().unwrap()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // --cache-dir wins; otherwise the session root's .codegraph.toml may
    // carry a [cache] dir override.
    let root = cli.root.clone().or_else(|| std::env::current_dir().ok());
    let cache_dir = cli.cache_dir.clone().or_else(|| {
        root.as_deref()
            .and_then(|r| codegraph_server::scan::ScanConfig::load(r).cache_dir_override)
    });

    let router = match Router::new(cache_dir) {
        Ok(router) => Arc::new(router),
        Err(e) => {
            error!("failed to open cache: {e}");
            std::process::exit(1);
        }
    };
    let session = Session::new(router, root);

    let exit_code = match cli.command {
        Commands::Index { path } => {
            let args = match path {
                Some(path) => serde_json::json!({ "repo_path": path.display().to_string() }),
                None => serde_json::json!({}),
            };
            print_result(dispatch_tool(&session, "index_repository", &args))
        }
        Commands::Tool { name, args } => match serde_json::from_str(&args) {
            Ok(args) => print_result(dispatch_tool(&session, &name, &args)),
            Err(e) => {
                eprintln!("invalid --args JSON: {e}");
                2
            }
        },
        Commands::Watch => {
            eprintln!("  [watch] polling indexed projects (ctrl-c to stop)");
            run_watcher(session, CancelToken::new());
            0
        }
        Commands::List => print_result(dispatch_tool(
            &session,
            "list_projects",
            &serde_json::json!({}),
        )),
        Commands::Delete { project } => print_result(dispatch_tool(
            &session,
            "delete_project",
            &serde_json::json!({ "project_name": project }),
        )),
    };
    std::process::exit(exit_code);
}

/// Print a tool result as pretty JSON; non-zero exit on `{error}` results.
fn print_result(result: serde_json::Value) -> i32 {
    let is_error = result.get("error").map(|e| !e.is_null()).unwrap_or(false);
    match serde_json::to_string_pretty(&result) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("failed to serialize result: {e}");
            return 1;
        }
    }
    if is_error {
        1
    } else {
        0
    }
}

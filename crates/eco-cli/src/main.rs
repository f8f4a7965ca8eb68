//! Eco Tutor CLI
//!
//! Serves the tutoring API, or exports stored sessions as transcripts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eco_report::{json::JsonGenerator, MarkdownGenerator};
use eco_tutor::{
    create_router, transcript_report, AppState, Catalog, ChatSessionView, Config, GeminiGenerator,
    MemoryStore, TutorStore,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3001;

/// Eco - AI tutor for research article discussions
///
/// Guides students through an assigned article in stages, from comprehension
/// to advanced analysis, and lets professors review and grade the sessions.
#[derive(Parser, Debug)]
#[command(name = "eco")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: eco.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Path of the state snapshot (overrides stateFile)
    #[arg(long, value_name = "FILE", global = true)]
    state_file: Option<String>,

    /// Assignment catalog to seed at startup (overrides catalog)
    #[arg(long, value_name = "FILE")]
    catalog: Option<String>,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Write every stored session as Markdown and JSON transcripts
    Export {
        /// Output directory for transcripts
        #[arg(short, long, value_name = "DIR", default_value = "transcripts")]
        output_dir: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Eco tutor starting");
    tracing::debug!(config = ?args.config, "Config file");

    let result = match args.command {
        Some(Command::Export { ref output_dir }) => {
            run_export(&args, Path::new(output_dir)).await
        }
        Some(Command::Serve) | None => run_server(&args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads config, opens the store, seeds the catalog and serves the API until
/// Ctrl+C.
async fn run_server(args: &Args) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    print_config(&config);

    let store = open_store(&config).await?;

    if let Some(catalog_path) = config.catalog.as_deref() {
        tracing::info!(catalog = %catalog_path, "Loading assignment catalog");
        let added = Catalog::load(Path::new(catalog_path))?
            .seed(&*store)
            .await?;
        println!("Catalog: {added} new assignment(s) seeded");
    }

    let generator = GeminiGenerator::from_settings(&config.gemini)?;
    let state = AppState::new(config, store, Arc::new(generator));
    let router = create_router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], args.port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Writes a transcript pair for every session in the store.
async fn run_export(args: &Args, output_dir: &Path) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let store = open_store(&config).await?;

    let views = collect_sessions(&*store).await?;
    if views.is_empty() {
        println!("No sessions to export");
        return Ok(());
    }

    std::fs::create_dir_all(output_dir)?;
    for view in &views {
        write_transcripts(view, output_dir)?;
    }
    println!();
    println!("Exported {} transcript(s) to {}", views.len(), output_dir.display());
    Ok(())
}

/// Loads the config file and applies CLI overrides.
fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref state_file) = args.state_file {
        config.state_file.clone_from(state_file);
    }
    if let Some(ref catalog) = args.catalog {
        config.catalog = Some(catalog.clone());
    }

    // Re-validate after overrides
    config.validate()?;
    Ok(config)
}

/// Loads configuration from file or defaults.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Opens the store snapshot named by the config.
async fn open_store(config: &Config) -> anyhow::Result<Arc<MemoryStore>> {
    let path = PathBuf::from(&config.state_file);
    tracing::info!(state_file = %path.display(), "Opening store");
    let store = MemoryStore::open(&path).await?;
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!();
    println!("Shutting down...");
}

fn print_config(config: &Config) {
    println!("Configuration:");
    println!("  Tutor: {}", config.tutor_name);
    println!("  Model: {}", config.gemini.model);
    println!(
        "  Web search: {}",
        if config.gemini.web_search { "on" } else { "off" }
    );
    println!("  Max message: {} chars", config.max_message_chars);
    println!("  AI timeout: {}s", config.ai_timeout_secs);
    println!("  State file: {}", config.state_file);
    println!(
        "  Gateway token: {}",
        if config.gateway_token.is_some() {
            "required"
        } else {
            "not configured"
        }
    );
}

/// Gathers the full view of every session, assignment by assignment.
async fn collect_sessions(store: &dyn TutorStore) -> anyhow::Result<Vec<ChatSessionView>> {
    let mut views = Vec::new();
    for assignment in store.list_assignments().await? {
        for session in store.list_sessions(assignment.id).await? {
            let messages = store.messages(session.id).await?;
            let grade = store.get_grade(session.id).await?;
            views.push(ChatSessionView {
                session,
                messages,
                assignment: assignment.clone(),
                grade,
            });
        }
    }
    Ok(views)
}

/// Writes `<stem>.md` and `<stem>.json` for one session.
fn write_transcripts(view: &ChatSessionView, output_dir: &Path) -> anyhow::Result<()> {
    let report = transcript_report(view);
    let stem = report.file_stem();

    let md_path = output_dir.join(format!("{stem}.md"));
    std::fs::write(&md_path, MarkdownGenerator::new(&report).generate())?;
    println!("  Markdown transcript: {}", md_path.display());

    let json_path = output_dir.join(format!("{stem}.json"));
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("  JSON transcript: {}", json_path.display());
    Ok(())
}

//! The playground host process: `serve` starts the HTTP server; `execute`
//! and `test` are thin HTTP clients for exercising one once it's running.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use playground_dispatcher::{Dispatcher, DEFAULT_JOB_BUDGET};
use playground_runtime::ScriptRuntime;
use playground_server::app;
use tracing::{info, instrument, warn};

const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(clap::Parser)]
#[command(version, about = "JavaScript playground server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Path to the SQLite database backing the `db` binding.
        #[arg(long, default_value = "./data.sqlite")]
        db: PathBuf,

        /// Directory of `.js` files to evaluate once at startup, in
        /// sorted order, before the listener binds. Not watched.
        #[arg(long)]
        scripts: Option<PathBuf>,

        /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
        #[arg(long, default_value = "info")]
        log_level: String,
    },
    /// Read a local script file and POST it to a running server's
    /// `/v1/execute`, printing the JSON result.
    Execute {
        /// Base URL of a running server, e.g. `http://127.0.0.1:8080`.
        url: String,
        /// Path to the script file to execute.
        script_file: PathBuf,
    },
    /// GET `/health` against a running server and print liveness.
    Test {
        /// Base URL of a running server, e.g. `http://127.0.0.1:8080`.
        url: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, db, scripts, log_level } => {
            init_tracing(&log_level)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(serve(port, db, scripts))
        }
        Command::Execute { url, script_file } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(execute(url, script_file))
        }
        Command::Test { url } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(test(url))
        }
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[instrument(skip_all, fields(port, db = %db.display()))]
async fn serve(port: u16, db: PathBuf, scripts: Option<PathBuf>) -> Result<()> {
    let runtime = ScriptRuntime::new(&db).with_context(|| format!("initializing script runtime at {}", db.display()))?;
    let dispatcher = Dispatcher::spawn(runtime, DEFAULT_QUEUE_CAPACITY);

    if let Some(dir) = scripts {
        preload_scripts(&dispatcher, &dir).await?;
    }

    let state = Arc::new(app::AppState::new(dispatcher.clone()));
    let router = app::build_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "playground server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    dispatcher.shutdown();
    info!("playground server shut down cleanly");
    Ok(())
}

/// Evaluate every `*.js` file under `dir`, in sorted order, before the
/// listener binds. One-shot: the directory is not watched for changes.
async fn preload_scripts(dispatcher: &Dispatcher, dir: &Path) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading scripts directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("js"))
        .collect();
    entries.sort();

    for path in entries {
        let source = fs::read_to_string(&path).with_context(|| format!("reading script {}", path.display()))?;
        info!(script = %path.display(), "preloading script");
        if let Err(err) = dispatcher.eval_source(source, DEFAULT_JOB_BUDGET).await {
            warn!(script = %path.display(), error = %err, "preload script failed");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("installing Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn execute(url: String, script_file: PathBuf) -> Result<()> {
    let source = fs::read_to_string(&script_file).with_context(|| format!("reading {}", script_file.display()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;

    let endpoint = format!("{}/v1/execute", url.trim_end_matches('/'));
    let response = client
        .post(&endpoint)
        .body(source)
        .send()
        .await
        .with_context(|| format!("POSTing to {endpoint}"))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.context("parsing response as JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }
    Ok(())
}

async fn test(url: String) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;

    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let response = client.get(&endpoint).send().await.with_context(|| format!("GETting {endpoint}"))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.context("parsing response as JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }
    Ok(())
}

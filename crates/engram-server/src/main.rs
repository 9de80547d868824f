// crates/engram-server/src/main.rs
// Engram - persistent knowledge store for LLM assistants

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use engram::background;
use engram::config::EngramConfig;
use engram::engine::Engine;

#[derive(Parser)]
#[command(name = "engram", version, about = "Persistent knowledge store for LLM assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Write a backup and exit
    Backup,
    /// Run the database integrity check and exit
    Integrity,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.engram/.env only (never from CWD - a malicious repo
    // could override the configured endpoints)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".engram/.env"))
    {
        tracing::debug!("No global .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    let log_level = match &cli.command {
        // Quiet for MCP stdio; the protocol owns stdout
        None | Some(Commands::Serve) => Level::WARN,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve) => serve().await,
        Some(Commands::Backup) => {
            let engine = Engine::open(EngramConfig::load()).await?;
            let path = engram::backup::create_backup(&engine, true).await?;
            println!("{}", path.display());
            Ok(())
        }
        Some(Commands::Integrity) => {
            let engine = Engine::open(EngramConfig::load()).await?;
            let ok = engine.pool.integrity_check().await?;
            println!("{}", if ok { "ok" } else { "FAILED" });
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    let config = EngramConfig::load();
    let engine = Engine::open(config).await?;

    // Surface crash trails from a dead predecessor right away
    let project = engine.project_id().await;
    if let Some(recovery) = engine.session.detect_crash(&engine.pool, &project).await {
        tracing::warn!(
            last_heartbeat = %recovery.last_heartbeat,
            "Previous session did not shut down cleanly"
        );
    }

    let shutdown_tx = background::spawn(engine.clone());

    // Auto-ingest new chat archives in the background
    if engine.config.chat_dir.is_some() {
        let engine = engine.clone();
        tokio::spawn(async move {
            let project = engine.project_id().await;
            for path in engine.discover_chat_archives() {
                let Ok(parsed) = engram::ingest::parse_archive_file(&path) else {
                    continue;
                };
                if let Err(e) = engine.ingest_conversation(&project, "claude", parsed).await {
                    tracing::debug!(path = %path.display(), "Auto-ingest skipped: {}", e);
                }
            }
        });
    }

    // Serve until the client hangs up or a signal arrives
    let served = {
        let engine = engine.clone();
        tokio::spawn(async move { engram::mcp::serve(engine).await })
    };

    tokio::select! {
        result = served => {
            if let Err(e) = result? {
                tracing::warn!("MCP server exited with error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Signal received");
        }
    }

    // Graceful shutdown: stop timers, drain writers, final backup, close
    let _ = shutdown_tx.send(true);
    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

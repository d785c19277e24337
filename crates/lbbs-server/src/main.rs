//! LBBS Bulletin Board Server
//!
//! Main entry point for the LBBS server.

use std::sync::Arc;

use lbbs_modules::ModuleLoader;
use lbbs_server::{ConsoleRegistry, ServerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("LBBS server starting...");

    // Load configuration from environment
    let config = ServerConfig::from_env();
    tracing::info!("Module directory: {:?}", config.modules.module_dir);

    let loader = Arc::new(ModuleLoader::new(config.modules));

    // Autoload; module load entrypoints may block, so keep them off the
    // runtime threads.
    let report = {
        let loader = Arc::clone(&loader);
        tokio::task::spawn_blocking(move || loader.load_all()).await?
    };
    if !report.fully_loaded() {
        tracing::warn!("Autoload incomplete: {}", report.summary());
    }

    run_console(&loader).await?;

    tracing::info!("Shutting down, unloading all modules");
    let unloading = Arc::clone(&loader);
    tokio::task::spawn_blocking(move || unloading.unload_all()).await?;
    tracing::info!("LBBS server stopped");
    Ok(())
}

/// Read sysop commands from stdin until EOF, `shutdown`, or ctrl-c.
async fn run_console(loader: &Arc<ModuleLoader>) -> anyhow::Result<()> {
    let console = Arc::new(ConsoleRegistry::with_builtins());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if matches!(line.trim(), "shutdown" | "quit") {
                    return Ok(());
                }
                let reply = {
                    let console = Arc::clone(&console);
                    let loader = Arc::clone(loader);
                    tokio::task::spawn_blocking(move || console.dispatch(&loader, &line)).await?
                };
                for message in reply.messages {
                    println!("{message}");
                }
            }
        }
    }
}

//! Engram CLI and REST API entry point.
//!
//! Binary name: `engram`
//!
//! Parses CLI arguments, opens the memory database, then runs a one-shot
//! command or serves the REST API until Ctrl+C or SIGTERM.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use engram_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "engram", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&TracingOptions {
        default_filter: cli.log_filter().to_string(),
        json: cli.json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (state, mut tasks) = AppState::init().await?;

    let outcome = match cli.command {
        Commands::Stats => cli::stats::stats(&state, cli.json).await,

        Commands::Health => match cli::stats::health(&state, cli.json).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(anyhow::anyhow!("memory storage is unhealthy")),
            Err(e) => Err(e),
        },

        Commands::Sweep => cli::stats::sweep(&state, cli.json, cli.quiet).await,

        Commands::Serve { port, host } => {
            state.start_lifecycle(&mut tasks);
            serve(&state, &host, port, cli.quiet).await
        }

        Commands::Completions { .. } => Ok(()),
    };

    state.close(tasks).await;
    outcome
}

async fn serve(state: &AppState, host: &str, port: u16, quiet: bool) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "engram API listening");

    if !quiet {
        println!(
            "  {} Engram API listening on {}",
            console::style("◆").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state.clone());
    let token = state.shutdown.clone();

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await?;

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

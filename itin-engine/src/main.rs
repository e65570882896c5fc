use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use itin_core::PipelineConfig;
use itin_observability::{init_process_logging, canonical_logs_dir_from_root, ProcessKind};
use itin_server::AppState;
use itin_types::{CreateItineraryRequest, Party};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "itin-engine")]
#[command(about = "Headless itinerary pipeline backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Runs a single generation against a local state dir without
    /// starting the HTTP server, printing the final snapshot as JSON.
    Generate {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        origin: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        start_date: chrono::NaiveDate,
        #[arg(long)]
        end_date: chrono::NaiveDate,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { hostname, port, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_guard, info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)?;
            tracing::info!(logs_dir = %info.logs_dir, "structured logging initialized");

            let config = PipelineConfig::from_env();
            let state = AppState::new(state_dir.join("storage"), config).await?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            log_startup_paths(&state_dir, &addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, itin_server::router(state))
                .with_graceful_shutdown(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }
        Command::Generate {
            user_id,
            origin,
            destination,
            start_date,
            end_date,
            state_dir,
        } => {
            tracing_subscriber::fmt().with_env_filter("info").with_target(false).init();
            let state_dir = resolve_state_dir(state_dir);
            let config = PipelineConfig::from_env();
            let state = AppState::new(state_dir.join("storage"), config).await?;

            let req = CreateItineraryRequest {
                user_id,
                origin,
                destination,
                start_date,
                end_date,
                currency: None,
                themes: vec![],
                party: Party::default(),
                budget_tier: None,
                interests: vec![],
            };
            req.validate().context("invalid itinerary request")?;

            let itinerary = itin_orchestrator::InitializationService::initialize(&state.storage, &req).await?;
            let itinerary_id = itinerary.itinerary_id.clone();
            state.orchestrator.generate(itinerary_id.clone(), &state.agents).await?;

            let final_itinerary = state.storage.get(&itinerary_id).await.context("itinerary vanished")?;
            println!("{}", serde_json::to_string_pretty(&final_itinerary)?);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("ITIN_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".itin")
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting itin-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleetcore::cli::{Cli, Commands, LeaderArgs, LeaderRole, WorkerArgs};
use fleetcore::config::FleetRegistry;
use fleetcore::engine::{MockPageExtractor, MockSummarizer};
use fleetcore::leader::{self, LeaderState};
use fleetcore::worker::{self, WorkerState};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let result = match cli.command {
        Commands::Leader(args) => run_leader(args).await,
        Commands::Worker(args) => run_worker(args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn load_env_file(path: &Option<std::path::PathBuf>) {
    if let Some(ref env_file) = path {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }
}

async fn run_leader(args: LeaderArgs) -> anyhow::Result<()> {
    load_env_file(&args.env_file);

    let registry = Arc::new(FleetRegistry::from_env(args.fleet.into())?);
    let node_id = match args.role {
        LeaderRole::Primary => registry.primary.id.clone(),
        LeaderRole::Backup1 => registry.backups[0].id.clone(),
        LeaderRole::Backup2 => registry.backups[1].id.clone(),
    };
    let self_info = registry
        .node_by_id(&node_id)
        .expect("role must resolve to a configured node")
        .clone();

    let bind_addr = args.bind_addr.unwrap_or_else(|| self_info.host.clone());
    let port = args.port.unwrap_or(self_info.port);
    let addr = format!("{bind_addr}:{port}");

    info!("starting leader node '{}' ({:?}) on {}", node_id, args.fleet, addr);

    let state = LeaderState::new(node_id.clone(), registry.clone());

    let heartbeat = state.heartbeat.clone();
    let hb_registry = registry.clone();
    let hb_node_id = node_id.clone();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let hb = heartbeat.clone();
        hb.run(
            move || hb_registry.all_other_nodes(&hb_node_id).into_iter().cloned().collect(),
            shutdown_rx,
        )
        .await;
    });

    tokio::spawn(leader::run_background_loop(state.clone()));

    let app = leader::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("leader listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    load_env_file(&args.env_file);

    let registry = Arc::new(FleetRegistry::from_env(args.fleet.into())?);
    let self_info = registry
        .worker_by_id(&args.id)
        .unwrap_or_else(|| {
            error!("worker id '{}' is not configured in this fleet", args.id);
            process::exit(1);
        })
        .clone();

    let bind_addr = args.bind_addr.unwrap_or_else(|| self_info.host.clone());
    let port = args.port.unwrap_or(self_info.port);
    let addr = format!("{bind_addr}:{port}");

    info!("starting worker node '{}' ({:?}) on {}", args.id, args.fleet, addr);

    let state = Arc::new(WorkerState::new(
        args.id.clone(),
        registry.clone(),
        Arc::new(MockPageExtractor),
        Arc::new(MockSummarizer),
    ));

    let heartbeat = state.heartbeat.clone();
    let heartbeat_for_targets = state.heartbeat.clone();
    let hb_registry = registry.clone();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        heartbeat
            .run(
                move || {
                    hb_registry
                        .node_by_id(&heartbeat_for_targets.current_leader_id())
                        .cloned()
                        .into_iter()
                        .collect()
                },
                shutdown_rx,
            )
            .await;
    });

    let app = worker::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("worker listening on {}", addr);
    info!("  POST /task              - accept work from the active leader");
    info!("  POST /heartbeat         - peer liveness");
    info!("  POST /election/victory  - leader-change announcement");
    info!("  GET  /health            - health check");
    axum::serve(listener, app).await?;

    Ok(())
}

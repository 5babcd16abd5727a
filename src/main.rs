use shard_counter::config::Config;
use shard_counter::counter::handlers::counter_router;
use shard_counter::counter::service::VisitCounterService;
use shard_counter::storage::client::{NodeConnector, SchemeConnector};
use shard_counter::storage::handlers::node_router;
use shard_counter::storage::manager::ShardManager;
use shard_counter::storage::memory::MemoryNode;
use shard_counter::storage::types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

fn usage(program: &str) {
    eprintln!("Usage: {} <node|serve> [options]", program);
    eprintln!("  node   run a storage node:   --bind <addr:port>");
    eprintln!(
        "  serve  run the counter:      --bind <addr:port> --node <url> [--node <url>...] \
         [--virtual-nodes N] [--cache-ttl-ms MS] [--flush-interval-ms MS] [--no-final-flush]"
    );
    eprintln!("Example: {} node --bind 127.0.0.1:7001", program);
    eprintln!(
        "Example: {} serve --bind 127.0.0.1:8000 --node http://127.0.0.1:7001 --node http://127.0.0.1:7002",
        program
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        usage(&args[0]);
        std::process::exit(1);
    }

    let mut config = Config::from_env()?;
    config.apply_args(&args[2..])?;

    match args[1].as_str() {
        "node" => run_node(config).await,
        "serve" => run_service(config).await,
        _ => {
            usage(&args[0]);
            std::process::exit(1);
        }
    }
}

async fn run_node(config: Config) -> anyhow::Result<()> {
    let node_id = NodeId::new(format!("http://{}", config.bind));
    let node = Arc::new(MemoryNode::new(node_id.clone()));

    tracing::info!("Storage node {} listening on {}", node_id, config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, node_router(node))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Storage node stopped");
    Ok(())
}

async fn run_service(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting counter service on {}", config.bind);
    tracing::info!(
        "Nodes: {:?} ({} virtual nodes each)",
        config.nodes,
        config.virtual_nodes
    );

    // 1. Sharded store:
    let connector: Arc<dyn NodeConnector> = Arc::new(SchemeConnector::default());
    let store = ShardManager::connect(config.nodes.clone(), config.virtual_nodes, connector).await?;

    // 2. Counter service (starts its flush loop):
    let service = VisitCounterService::start(store.clone(), config.counter_settings());

    // 3. Stats reporter:
    let stats_service = service.clone();
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            let buffered = stats_service.buffered_keys().await.len();
            let (buffer_slots, cache_slots) = stats_service.tracked_slots();
            tracing::info!(
                "Counter stats: {} nodes, {} pages buffered, {} buffer slots, {} cache slots",
                stats_service.store().node_count(),
                buffered,
                buffer_slots,
                cache_slots
            );
        }
    });

    // 4. HTTP server:
    let app = counter_router(service.clone());
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("HTTP server listening on {}", config.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Drain:
    stats_handle.abort();
    service.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

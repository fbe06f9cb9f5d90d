use anyhow::Result;
use clap::Parser;
use fpindex::{create_router, AppState, Index, IndexMetrics, IndexSettings, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fpindex")]
#[command(about = "Audio fingerprint index server", long_about = None)]
struct Args {
    /// Directory holding the index segments and manifest
    #[arg(long, env = "FPINDEX_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Bind address for the HTTP API
    #[arg(long, env = "FPINDEX_BIND_ADDR", default_value = "127.0.0.1:6080")]
    bind_addr: String,

    /// Flush the in-memory buffer once it holds this many postings
    #[arg(long, env = "FPINDEX_MAX_BUFFER_POSTINGS", default_value = "1000000")]
    max_buffer_postings: usize,

    /// Compact segments once there are more than this many
    #[arg(long, env = "FPINDEX_MAX_SEGMENTS", default_value = "10")]
    max_segments: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting fpindex v{}", fpindex::VERSION);

    let settings = IndexSettings::default()
        .with_max_buffer_postings(args.max_buffer_postings)
        .with_max_segments(args.max_segments);
    let config = ServerConfig::new(args.bind_addr, args.data_dir).with_index_settings(settings);

    info!("Configuration:");
    info!("  Bind address: {}", config.bind_addr);
    info!("  Data directory: {:?}", config.data_dir);
    info!("  Max buffer postings: {}", config.index.max_buffer_postings);
    info!("  Max segments: {}", config.index.max_segments);

    let index = Index::open_dir(&config.data_dir, config.index.clone())?;
    let metrics = Arc::new(IndexMetrics::new()?);
    let stats = index.stats();
    metrics.set_index_state(stats.segment_count, stats.buffer_postings);

    let state = Arc::new(AppState::new(index, metrics));
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("HTTP API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal, gracefully shutting down");
        })
        .await?;

    // persist whatever is still buffered
    match Arc::try_unwrap(state) {
        Ok(state) => state.index.into_inner().close()?,
        Err(state) => state.index.write().flush()?,
    }
    info!("Index closed");

    Ok(())
}

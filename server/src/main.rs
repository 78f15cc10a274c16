use anyhow::Result;
use clap::Parser;
use shelf_core::{ProviderConfig, RainforestClient, RatingsService, RefreshConfig, SledStore};
use shelf_server::build_app;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Ratings database directory
    #[arg(long, default_value = "./data/ratings")]
    db: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let store = Arc::new(SledStore::open(&args.db)?);
    let provider_config = ProviderConfig::from_env();
    let provider = Arc::new(RainforestClient::new(provider_config.api_key, &provider_config.base_url, provider_config.timeout)?);
    let service = RatingsService::new(store, provider, RefreshConfig::from_env());
    let app = build_app(Arc::clone(&service));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, db = %args.db, "server listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    service.shutdown().await;
    Ok(())
}

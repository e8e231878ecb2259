use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use authservice::config;
use authservice::filter::{FilterChain, OidcFilterChain};
use authservice::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("AUTHSERVICE_CONFIG").unwrap_or_else(|_| "authservice".to_string());
    let settings = config::load_settings(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let mut chains: Vec<Arc<dyn FilterChain>> = Vec::with_capacity(settings.chains.len());
    for chain_config in settings.chains.clone() {
        let name = chain_config.name.clone();
        let chain = OidcFilterChain::from_config(chain_config).await?;
        tracing::info!(chain = %name, "filter chain configured");
        chains.push(Arc::new(chain));
    }

    let addr: SocketAddr = format!("{}:{}", settings.listen_address, settings.listen_port).parse()?;
    let app = server::router(Arc::new(AppState { chains }));

    tracing::info!(%addr, "listening for authorization checks");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

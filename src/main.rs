use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use toolscan::api::{create_router, AppState};
use toolscan::catalog::builtin_signatures;
use toolscan::config::{self, DiscoveryConfig};
use toolscan::credentials::TokenCipher;
use toolscan::provider::ProviderRegistry;
use toolscan::store::DiscoveryStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolscan=info".into()),
        )
        .init();

    let config = match std::env::var("TOOLSCAN_CONFIG") {
        Ok(path) => config::load_config(&path)?,
        Err(_) => DiscoveryConfig::default(),
    };

    // Secrets are validated here so a bad deployment fails at startup
    let key = config::encryption_key_from_env()?;
    let cipher = TokenCipher::new(&key).context("Invalid encryption key")?;

    let store = Arc::new(DiscoveryStore::new(&config.database.path)?);
    let seeded = store.seed_signatures(&builtin_signatures())?;
    info!(seeded, "Signature catalog ready");

    let providers = Arc::new(ProviderRegistry::from_config(&config)?);

    let bind_addr = config.api.bind_addr.clone();
    let state = AppState::new(
        store,
        cipher,
        providers,
        config.scan.clone(),
        config.api.callback_base_url.clone(),
    );
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Discovery service listening");

    axum::serve(listener, app).await?;

    Ok(())
}

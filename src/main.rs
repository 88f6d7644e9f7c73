use anyhow::{Context, Result};
use clickup_broker::api::{create_router, ClickUpAppState, OAuthAppState};
use clickup_broker::config::AppConfig;
use clickup_broker::gateway::ResourceGateway;
use clickup_broker::credentials::{
    generate_key, Cipher, CredentialStore, MemoryStore, SecretStore, SqliteStore,
};
use clickup_broker::oauth::{run_state_cleanup, HttpTokenEndpoint, OAuthManager, StateRegistry};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = AppConfig::load(config_path.as_deref())?;

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clickup_broker={}", config.server.log_level).into()),
        )
        .init();

    info!("ClickUp broker starting...");

    let encryption_key = match &config.security.encryption_key {
        Some(key) => key.clone(),
        None => {
            warn!("ENCRYPTION_KEY not set; generated an ephemeral key, stored credentials will not survive a restart");
            generate_key()
        }
    };
    let cipher = Cipher::from_base64(&encryption_key).context("Invalid encryption key")?;

    let backend: Arc<dyn SecretStore> = match &config.storage.database_path {
        Some(path) => {
            info!(path = %path, "Using SQLite credential store");
            Arc::new(SqliteStore::open(path).context("Failed to open credential database")?)
        }
        None => {
            info!("Using in-memory credential store");
            Arc::new(MemoryStore::new())
        }
    };

    let provider = config.provider();
    let endpoint = HttpTokenEndpoint::new(&provider, config.http.timeout())?;
    let states = StateRegistry::new(config.state_ttl());

    if states.ttl().is_some() {
        tokio::spawn(run_state_cleanup(
            states.clone(),
            config.security.state_cleanup_interval_seconds,
        ));
    }

    let manager = Arc::new(OAuthManager::new(
        provider,
        CredentialStore::new(backend, cipher),
        states,
        Arc::new(endpoint),
    ));

    let gateway = Arc::new(
        ResourceGateway::new(
            Arc::clone(&manager),
            config.clickup.api_url.clone(),
            config.http.timeout(),
        )
        .context("Failed to build ClickUp client")?,
    );

    let app = create_router(
        OAuthAppState {
            manager: Arc::clone(&manager),
        },
        ClickUpAppState { manager, gateway },
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        addr = %addr,
        redirect_uri = %config.clickup.redirect_uri,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

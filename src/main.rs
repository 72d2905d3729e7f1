use adyen_billing_bridge::api::{self, AppState};
use adyen_billing_bridge::billing::{BillingConfig, HttpBillingPlatform};
use adyen_billing_bridge::config::Config;
use adyen_billing_bridge::database::{self, PgResponseStore, PoolConfig};
use adyen_billing_bridge::notifications::NotificationHandler;
use adyen_billing_bridge::payments::providers::HmacSha256Signer;
use adyen_billing_bridge::tenant::TenantRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting adyen-billing-bridge");
    tracing::info!("Environment: {}", config.server.environment);

    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..Default::default()
        }),
    )
    .await?;
    database::run_migrations(&pool).await?;

    let tenants = TenantRegistry::load(&config.tenants.path)?;
    tracing::info!("Loaded {} tenant(s) from {}", tenants.len(), config.tenants.path);

    let billing = HttpBillingPlatform::new(BillingConfig::from_env()?)?;
    let handler = NotificationHandler::new(
        Arc::new(PgResponseStore::new(pool.clone())),
        Arc::new(billing),
        Arc::new(HmacSha256Signer),
        Arc::new(tenants),
    );

    let state = AppState::new(Arc::new(handler), config.server.environment.clone()).with_pool(pool);
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

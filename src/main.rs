use std::net::SocketAddr;
use std::sync::Arc;

use coursepay_backend::api::{self, AppState};
use coursepay_backend::config::Config;
use coursepay_backend::database::course_catalog::CourseCatalogRepository;
use coursepay_backend::database::coupon_repository::CouponRepository;
use coursepay_backend::database::purchase_repository::PurchaseRepository;
use coursepay_backend::database::{self, PoolConfig};
use coursepay_backend::payments::dispatcher::WebhookDispatcher;
use coursepay_backend::payments::orchestrator::CheckoutOrchestrator;
use coursepay_backend::payments::providers::card::CardAdapter;
use coursepay_backend::payments::providers::gulf::GulfAdapter;
use coursepay_backend::payments::providers::paypal::PaypalAdapter;
use coursepay_backend::payments::providers::regional::RegionalAdapter;
use coursepay_backend::payments::registry::ProviderRegistry;
use coursepay_backend::payments::LoggingEnrollmentNotifier;
use tracing_subscriber::EnvFilter;

/// A provider whose environment is not configured is skipped, not fatal:
/// the registry reports it as unavailable at request time.
fn build_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    match CardAdapter::from_env() {
        Ok(adapter) => registry = registry.register(Arc::new(adapter)),
        Err(e) => tracing::warn!("Card processor disabled: {}", e),
    }
    match PaypalAdapter::from_env() {
        Ok(adapter) => registry = registry.register(Arc::new(adapter)),
        Err(e) => tracing::warn!("PayPal disabled: {}", e),
    }
    match RegionalAdapter::from_env() {
        Ok(adapter) => registry = registry.register(Arc::new(adapter)),
        Err(e) => tracing::warn!("Regional gateway disabled: {}", e),
    }
    match GulfAdapter::from_env() {
        Ok(adapter) => registry = registry.register(Arc::new(adapter)),
        Err(e) => tracing::warn!("Gulf gateway disabled: {}", e),
    }

    registry
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting CoursePay Backend");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Settlement currency: {}", config.payments.currency);

    // Database pool
    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await?;

    // Payment core wiring
    let registry = Arc::new(build_registry());
    tracing::info!("Providers registered: {:?}", registry.registered());

    let purchases = Arc::new(PurchaseRepository::new(pool.clone()));
    let coupons = Arc::new(CouponRepository::new(pool.clone()));
    let catalog = Arc::new(CourseCatalogRepository::new(pool.clone()));
    let notifier = Arc::new(LoggingEnrollmentNotifier);

    let dispatcher = Arc::new(WebhookDispatcher::new(
        registry.clone(),
        purchases.clone(),
        notifier,
    ));
    let orchestrator = Arc::new(CheckoutOrchestrator::new(
        registry,
        purchases,
        coupons,
        catalog,
        dispatcher.clone(),
        config.payments.clone(),
    ));

    // Build router
    let app = api::router(AppState {
        config: config.clone(),
        pool,
        orchestrator,
        dispatcher,
    });

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

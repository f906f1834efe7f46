use anyhow::Result;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use admission_gate::{
    config::{Settings, StoreBackend},
    http::{router, AppState},
    limiter::RateLimiter,
    metrics::Metrics,
    service::AdmissionService,
    store::{CounterStore, MemoryCounterStore, RedisCounterStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admission_gate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Admission Gate");

    let settings = Settings::load()?;
    let service = create_service(&settings).await?;
    let state = AppState { service };

    let http_addr = settings.http_addr()?;
    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                warn!("HTTP server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("Service stopped");
    Ok(())
}

async fn create_service(settings: &Settings) -> Result<Arc<AdmissionService>> {
    let registry = settings.load_registry()?;
    info!(
        "Loaded {} limits from {}",
        registry.len(),
        settings.limits_path.as_deref().unwrap_or("<none>")
    );
    for limit in registry.iter() {
        info!("  {}", limit);
    }

    let store: Arc<dyn CounterStore> = match settings.store {
        StoreBackend::Redis => Arc::new(RedisCounterStore::new(settings.redis_config()).await?),
        StoreBackend::Memory => {
            warn!("Using in-memory counters; limits are not shared between instances");
            Arc::new(MemoryCounterStore::new())
        }
    };

    info!(
        "Store failure policy: {:?} (retry after {}s when closed)",
        settings.failure_policy, settings.failure_retry_after_secs
    );
    let limiter = RateLimiter::new(Arc::new(registry), store)
        .with_failure_policy(settings.failure_policy, settings.failure_retry_after_secs);
    let metrics = Arc::new(Metrics::new()?);

    Ok(Arc::new(AdmissionService::new(limiter, metrics)))
}

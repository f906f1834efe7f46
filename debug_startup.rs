// Startup diagnostics: resolves the configured limits and probes the counter store
// Run this with: cargo run --bin debug_startup [resource] [operation]

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use admission_gate::{
    config::{Settings, StoreBackend},
    registry::LimitRegistry,
    store::{CounterStore, RedisCounterStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting startup diagnostics...");
    let start_time = Instant::now();

    let settings = Settings::load()?;
    info!("Settings: {:?}", settings);

    let registry = settings.load_registry()?;
    dump_resolution(&registry);

    match settings.store {
        StoreBackend::Redis => test_redis_connection(&settings).await?,
        StoreBackend::Memory => warn!("In-memory store configured, nothing to probe"),
    }

    info!("Diagnostics completed in {:?}", start_time.elapsed());
    Ok(())
}

fn dump_resolution(registry: &LimitRegistry) {
    let mut args = std::env::args().skip(1);
    let resource = args.next();
    let operation = args.next();

    let limits = registry.resolve(resource.as_deref(), operation.as_deref());
    info!(
        "{} of {} limits apply to resource={:?} operation={:?}",
        limits.len(),
        registry.len(),
        resource,
        operation
    );
    for limit in limits {
        info!("  {} -> key {}<client>", limit, limit.counter_key_template());
    }
}

async fn test_redis_connection(settings: &Settings) -> Result<()> {
    info!("Testing Redis connection to {}", settings.redis_url);

    let connection_start = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        RedisCounterStore::new(settings.redis_config()),
    )
    .await;

    let store = match result {
        Ok(Ok(store)) => {
            info!("Redis store connected in {:?}", connection_start.elapsed());
            store
        }
        Ok(Err(e)) => {
            error!("Redis store creation failed: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            error!("Redis store creation timed out after 10 seconds");
            return Err(anyhow::anyhow!("Redis connection timeout"));
        }
    };

    let probe_key = format!("{}:debug_startup:probe", settings.key_prefix);
    let probe_start = Instant::now();
    store.reset(&probe_key, 1, 5).await?;
    let count = store.increment(&probe_key).await?;
    let ttl = store.ttl(&probe_key).await?;
    info!(
        "Counter probe: count={} ttl={}s in {:?}",
        count,
        ttl,
        probe_start.elapsed()
    );

    if count != 2 || ttl <= 0 {
        warn!("Unexpected counter behaviour; limits may not be enforced correctly");
    }

    Ok(())
}

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conductor_bus::{BusAdapter, BusConfig};
use conductor_core::{
    Config, DemoRunner, Dispatcher, RedisStateStore, RegistryMover, TrainRouter, VaultRouteStore,
};
use harbor_client::HarborClient;
use vault_client::VaultClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("conductor_core=info".parse()?)
                .add_directive("conductor_bus=info".parse()?)
                .add_directive("conductor_server=info".parse()?),
        )
        .init();

    info!("Train router starting...");

    // Load config
    let config = Config::from_env();
    config.log_redacted();

    // Connect to Harbor and fail fast on bad credentials
    let harbor = HarborClient::new(
        &config.harbor_url,
        &config.harbor_user,
        &config.harbor_password,
    );
    harbor.ping().await?;
    info!("Successfully connected to Harbor");

    let vault = VaultClient::new(&config.vault_url, &config.vault_token);

    // Runtime state store
    let state = RedisStateStore::connect(&config.redis_host).await?;
    info!("Successfully connected to Redis");

    let demo = if config.demonstration_mode {
        info!("Demonstration mode enabled, loading demo stations");
        Some(Arc::new(DemoRunner::load(&vault, &config.harbor_url).await?))
    } else {
        None
    };

    let router = TrainRouter::new(
        Arc::new(VaultRouteStore::new(vault)),
        Arc::new(state),
        RegistryMover::new(Arc::new(harbor)),
        config.auto_start,
        demo,
    );

    // The route catalog is authoritative across restarts; re-seed anything
    // the state store lost.
    router.sync_routes().await?;

    let dispatcher = Dispatcher::new(router);
    let bus = BusAdapter::new(BusConfig::new(&config.amqp_url));
    bus.run(&dispatcher).await
}

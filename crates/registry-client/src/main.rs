use anyhow::Context;
use registry_client::{InstanceStatus, RegistrarConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RegistrarConfig::from_env().context("Failed to read registrar configuration")?;
    let instance = config
        .instance()
        .context("Failed to build the instance to register")?
        .with_status(InstanceStatus::Up);

    tracing::info!(
        "Registering {} with {:?} at {:?}",
        instance.service_name(),
        config.backend,
        config.endpoints
    );

    let lifecycle = config
        .build_lifecycle()
        .context("Failed to set up the registry backend")?;
    let registered = lifecycle
        .register(instance)
        .await
        .context("Failed to register with the service registry")?;

    tracing::info!(
        "Registered {} as {}, press Ctrl-C to unregister",
        registered.service_name(),
        registered.instance_id()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down, unregistering {}", registered.instance_id());
    lifecycle
        .unregister()
        .await
        .context("Failed to unregister from the service registry")?;

    Ok(())
}

use crate::client::RegistryClient;
use crate::config::RegistrarConfig;
use crate::error::Result;
use crate::instance::{InstanceStatus, ServiceInstance};
use crate::lifecycle::RegistrationLifecycle;
use crate::query::InstanceQuery;
use tracing::{debug, info, warn};

/// Bootstrap a service with automatic registration against the configured registry
///
/// This function:
/// - Reads the registry settings from the environment (see [`RegistrarConfig::from_env`])
/// - Generates a provisional instance id from hostname and PID
/// - Registers the instance as UP and waits for the registry to confirm it
/// - Leaves a heartbeat running for as long as the returned lifecycle lives
///
/// Returns the lifecycle and the confirmed instance
pub async fn bootstrap_service(
    service_name: impl Into<String>,
    address: impl Into<String>,
    port: u16,
) -> Result<(RegistrationLifecycle, ServiceInstance)> {
    let mut config = RegistrarConfig::from_env()?;
    config.instance.name = service_name.into();
    config.instance.host = address.into();
    config.instance.port = port;

    let instance = config.instance()?.with_status(InstanceStatus::Up);
    let lifecycle = config.build_lifecycle()?;

    info!(
        "Bootstrapping {} on {}:{} via {:?}",
        instance.service_name(),
        instance.host_name(),
        port,
        config.endpoints
    );
    let registered = lifecycle.register(instance).await?;

    Ok((lifecycle, registered))
}

/// Get the endpoint URL for a service by name
///
/// Asks the configured registry for a matching instance, picks one at random
/// and returns its base URL.
///
/// Returns None if the service is not found or if there's an error.
pub async fn get_service_endpoint(service_name: &str) -> Option<String> {
    debug!("Looking up service: {}", service_name);

    match find_instance(service_name).await {
        Ok(Some(instance)) => {
            let endpoint = instance.url();
            debug!("Found service {} at {}", service_name, endpoint);
            Some(endpoint)
        }
        Ok(None) => {
            warn!("No instances found for service: {}", service_name);
            None
        }
        Err(e) => {
            warn!("Failed to query service registry for {}: {}", service_name, e);
            None
        }
    }
}

async fn find_instance(service_name: &str) -> Result<Option<ServiceInstance>> {
    let client = RegistrarConfig::from_env()?.build_client()?;
    let query = InstanceQuery::new(service_name)?;
    client.find_one(&query).await
}

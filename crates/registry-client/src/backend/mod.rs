//! Registry protocols the lifecycle can register against.

pub mod consul;
pub mod eureka;

use crate::error::RemoteError;
use crate::instance::ServiceInstance;
use async_trait::async_trait;

pub use consul::ConsulClient;
pub use eureka::EurekaClient;

/// Registration calls against one registry endpoint.
///
/// Every call targets the base URL it is handed; choosing and rotating
/// endpoints is the caller's business.
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    /// Submit `instance` and return the id the registry knows it by.
    async fn register(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> Result<String, RemoteError>;

    /// Fetch the registry's current view of a registered instance.
    /// A missing instance is a 404 [`RemoteError::Status`].
    async fn find(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> Result<ServiceInstance, RemoteError>;

    async fn heartbeat(&self, endpoint: &str, instance: &ServiceInstance)
        -> Result<(), RemoteError>;

    /// Push `instance.status()` to the registry.
    async fn update_status(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> Result<(), RemoteError>;

    async fn unregister(&self, endpoint: &str, instance: &ServiceInstance)
        -> Result<(), RemoteError>;
}

/// Turn a non-2xx response into a [`RemoteError::Status`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(RemoteError::status(status.as_u16(), body))
}

pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed building HTTP client with timeout, using defaults: {}", e);
            reqwest::Client::new()
        })
}

//! Discovery across several registries at once.

use super::{Backend, RegistryClient};
use crate::error::{RegistryError, Result};
use crate::instance::ServiceInstance;
use crate::query::InstanceQuery;
use async_trait::async_trait;
use tracing::debug;

/// Queries an ordered list of backends.
///
/// Lookups by id stop at the first backend that knows the instance; listings
/// concatenate every backend's answer in backend order. A failing backend
/// fails the whole call.
pub struct FanoutClient {
    backends: Vec<Backend>,
}

impl FanoutClient {
    pub fn new(backends: Vec<Backend>) -> Result<Self> {
        if backends.is_empty() {
            return Err(RegistryError::Configuration(
                "fan-out discovery needs at least one backend".to_string(),
            ));
        }
        Ok(Self { backends })
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }
}

#[async_trait]
impl RegistryClient for FanoutClient {
    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
        let mut instances = Vec::new();
        for backend in &self.backends {
            let found = backend.find_all(query).await?;
            debug!(
                "Backend {} returned {} instances of {}",
                backend.name(),
                found.len(),
                query.service_name()
            );
            instances.extend(found);
        }
        Ok(instances)
    }

    async fn list_all(&self) -> Result<Vec<ServiceInstance>> {
        let mut instances = Vec::new();
        for backend in &self.backends {
            instances.extend(backend.list_all().await?);
        }
        Ok(instances)
    }

    async fn find_by_id(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> Result<Option<ServiceInstance>> {
        for backend in &self.backends {
            if let Some(instance) = backend.find_by_id(service_name, instance_id).await? {
                debug!("Found {} in backend {}", instance_id, backend.name());
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FixedClient, NoopClient};

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance::new("search", id, "localhost", 9200).with_version("1.0")
    }

    fn fixed(ids: &[&str]) -> Backend {
        Backend::from(FixedClient::new(ids.iter().map(|id| instance(id)).collect()))
    }

    fn ids(instances: &[ServiceInstance]) -> Vec<&str> {
        instances.iter().map(|i| i.instance_id()).collect()
    }

    #[test]
    fn test_empty_fanout_is_rejected() {
        assert!(matches!(
            FanoutClient::new(Vec::new()),
            Err(RegistryError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_find_all_skips_empty_backends() {
        let client = FanoutClient::new(vec![Backend::from(NoopClient), fixed(&["x", "y"])]).unwrap();
        let query = InstanceQuery::new("search").unwrap();

        assert_eq!(ids(&client.find_all(&query).await.unwrap()), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_find_all_preserves_backend_order() {
        let client = FanoutClient::new(vec![fixed(&["x"]), fixed(&["y"])]).unwrap();
        let query = InstanceQuery::new("search").unwrap();

        assert_eq!(ids(&client.find_all(&query).await.unwrap()), vec!["x", "y"]);
        assert_eq!(ids(&client.list_all().await.unwrap()), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_find_by_id_first_hit_wins() {
        let first = ServiceInstance::new("search", "dup", "first", 1).with_version("1.0");
        let second = ServiceInstance::new("search", "dup", "second", 2).with_version("1.0");
        let client = FanoutClient::new(vec![
            Backend::from(NoopClient),
            Backend::from(FixedClient::new(vec![first])),
            Backend::from(FixedClient::new(vec![second])),
        ])
        .unwrap();

        let found = client.find_by_id("search", "dup").await.unwrap().unwrap();
        assert_eq!(found.host_name(), "first");
        assert!(client.find_by_id("search", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nested_fanout() {
        let inner = FanoutClient::new(vec![fixed(&["a"]), fixed(&["b"])]).unwrap();
        let outer = FanoutClient::new(vec![Backend::from(inner), fixed(&["c"])]).unwrap();

        assert_eq!(ids(&outer.list_all().await.unwrap()), vec!["a", "b", "c"]);
    }
}

//! Service discovery across registry backends.

pub mod fanout;
pub mod fixed;
pub mod noop;

use crate::backend::{ConsulClient, EurekaClient};
use crate::error::Result;
use crate::instance::ServiceInstance;
use crate::query::InstanceQuery;
use async_trait::async_trait;
use rand::Rng;

pub use fanout::FanoutClient;
pub use fixed::FixedClient;
pub use noop::NoopClient;

/// Discovery capability every backend provides.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Instances of `query.service_name()` that satisfy its version hints.
    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ServiceInstance>>;

    /// Every instance of every service the backend knows about.
    async fn list_all(&self) -> Result<Vec<ServiceInstance>>;

    async fn find_by_id(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> Result<Option<ServiceInstance>> {
        find_by_id(self, service_name, instance_id).await
    }

    /// One matching instance, chosen uniformly at random.
    async fn find_one(&self, query: &InstanceQuery) -> Result<Option<ServiceInstance>> {
        Ok(pick_random(self.find_all(query).await?))
    }
}

/// Look up a single instance by service name and id (ids compare case-insensitively).
pub async fn find_by_id<C>(
    client: &C,
    service_name: &str,
    instance_id: &str,
) -> Result<Option<ServiceInstance>>
where
    C: RegistryClient + ?Sized,
{
    let query = InstanceQuery::new(service_name)?;
    Ok(client
        .find_all(&query)
        .await?
        .into_iter()
        .find(|instance| instance.instance_id().eq_ignore_ascii_case(instance_id)))
}

pub fn pick_random(mut instances: Vec<ServiceInstance>) -> Option<ServiceInstance> {
    if instances.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..instances.len());
    Some(instances.swap_remove(index))
}

/// The registry backends discovery can run against.
pub enum Backend {
    Eureka(EurekaClient),
    Consul(ConsulClient),
    Fixed(FixedClient),
    Noop(NoopClient),
    Fanout(FanoutClient),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Eureka(_) => "eureka",
            Backend::Consul(_) => "consul",
            Backend::Fixed(_) => "fixed",
            Backend::Noop(_) => "noop",
            Backend::Fanout(_) => "fanout",
        }
    }

    fn client(&self) -> &dyn RegistryClient {
        match self {
            Backend::Eureka(client) => client,
            Backend::Consul(client) => client,
            Backend::Fixed(client) => client,
            Backend::Noop(client) => client,
            Backend::Fanout(client) => client,
        }
    }
}

#[async_trait]
impl RegistryClient for Backend {
    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
        self.client().find_all(query).await
    }

    async fn list_all(&self) -> Result<Vec<ServiceInstance>> {
        self.client().list_all().await
    }

    async fn find_by_id(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> Result<Option<ServiceInstance>> {
        self.client().find_by_id(service_name, instance_id).await
    }
}

impl From<EurekaClient> for Backend {
    fn from(client: EurekaClient) -> Self {
        Backend::Eureka(client)
    }
}

impl From<ConsulClient> for Backend {
    fn from(client: ConsulClient) -> Self {
        Backend::Consul(client)
    }
}

impl From<FixedClient> for Backend {
    fn from(client: FixedClient) -> Self {
        Backend::Fixed(client)
    }
}

impl From<NoopClient> for Backend {
    fn from(client: NoopClient) -> Self {
        Backend::Noop(client)
    }
}

impl From<FanoutClient> for Backend {
    fn from(client: FanoutClient) -> Self {
        Backend::Fanout(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance::new("search", id, "localhost", 9200).with_version("1.0")
    }

    #[test]
    fn test_pick_random_empty() {
        assert!(pick_random(Vec::new()).is_none());
    }

    #[test]
    fn test_pick_random_returns_a_member() {
        for _ in 0..20 {
            let picked = pick_random(vec![instance("a"), instance("b"), instance("c")]).unwrap();
            assert!(["a", "b", "c"].contains(&picked.instance_id()));
        }
    }

    #[tokio::test]
    async fn test_find_by_id_is_case_insensitive() {
        let backend = Backend::from(FixedClient::new(vec![instance("SEARCH-1"), instance("SEARCH-2")]));

        let found = backend.find_by_id("search", "search-2").await.unwrap();
        assert_eq!(found.map(|i| i.instance_id().to_string()), Some("SEARCH-2".to_string()));

        let missing = backend.find_by_id("search", "search-9").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_find_one_from_noop_is_none() {
        let backend = Backend::from(NoopClient);
        let query = InstanceQuery::new("search").unwrap();
        assert!(backend.find_one(&query).await.unwrap().is_none());
        assert_eq!(backend.name(), "noop");
    }
}

//! Discovery over a fixed list of instances (static configuration, tests).

use super::RegistryClient;
use crate::error::Result;
use crate::instance::ServiceInstance;
use crate::query::InstanceQuery;
use crate::version;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct FixedClient {
    instances: Vec<ServiceInstance>,
}

impl FixedClient {
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self { instances }
    }

    pub fn count(&self) -> usize {
        self.instances.len()
    }
}

#[async_trait]
impl RegistryClient for FixedClient {
    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
        let candidates: Vec<ServiceInstance> = self
            .instances
            .iter()
            .filter(|i| i.service_name().eq_ignore_ascii_case(query.service_name()))
            .cloned()
            .collect();
        version::resolve(&candidates, query)
    }

    async fn list_all(&self) -> Result<Vec<ServiceInstance>> {
        Ok(self.instances.clone())
    }
}

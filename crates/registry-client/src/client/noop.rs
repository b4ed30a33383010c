use super::RegistryClient;
use crate::error::Result;
use crate::instance::ServiceInstance;
use crate::query::InstanceQuery;
use async_trait::async_trait;

/// Discovery that never finds anything. Stands in when no registry is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClient;

#[async_trait]
impl RegistryClient for NoopClient {
    async fn find_all(&self, _query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
        Ok(Vec::new())
    }

    async fn list_all(&self) -> Result<Vec<ServiceInstance>> {
        Ok(Vec::new())
    }
}

//! Consul agent/catalog backend

use super::{check_status, http_client, RegistrationBackend};
use crate::client::RegistryClient;
use crate::error::{RemoteError, Result};
use crate::instance::{InstanceStatus, ServiceInstance};
use crate::metadata;
use crate::query::InstanceQuery;
use crate::rotator::EndpointRotator;
use crate::version;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Consul's own catalog entry, never reported as a peer.
const CONSUL_SERVICE: &str = "consul";

fn check_id(instance: &ServiceInstance) -> String {
    format!("service:{}", instance.instance_id())
}

fn go_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}

#[derive(Deserialize)]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
    #[serde(rename = "Meta", default)]
    meta: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct CatalogService {
    #[serde(rename = "ServiceID")]
    service_id: String,
    #[serde(rename = "ServiceName")]
    service_name: String,
    #[serde(rename = "ServiceAddress", default)]
    service_address: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Node", default)]
    node: String,
    #[serde(rename = "ServicePort", default)]
    service_port: u16,
    #[serde(rename = "ServiceMeta", default)]
    service_meta: Option<BTreeMap<String, String>>,
}

impl CatalogService {
    fn into_instance(self, raw: serde_json::Value) -> ServiceInstance {
        // an empty ServiceAddress means "same as the node"
        let ip = if self.service_address.is_empty() {
            self.address
        } else {
            self.service_address
        };
        let host = if self.node.is_empty() { ip.clone() } else { self.node };

        let instance = ServiceInstance::new(self.service_name, self.service_id, host, self.service_port)
            .with_ip(ip);
        metadata::apply_metadata(instance, &self.service_meta.unwrap_or_default()).with_native(raw)
    }
}

/// Consul registry client
///
/// Registers through the local agent with a TTL check that heartbeats keep
/// passing; discovers through the catalog.
pub struct ConsulClient {
    rotator: Arc<EndpointRotator>,
    client: reqwest::Client,
    check_ttl: Duration,
    deregister_after: Duration,
}

impl ConsulClient {
    /// Create a client over the given agent endpoints, e.g. `http://localhost:8500`.
    ///
    /// `check_ttl` should comfortably exceed the heartbeat interval.
    pub fn new(rotator: Arc<EndpointRotator>, request_timeout: Duration, check_ttl: Duration) -> Self {
        Self {
            rotator,
            client: http_client(request_timeout),
            check_ttl,
            deregister_after: check_ttl * 10,
        }
    }

    pub fn rotator(&self) -> &Arc<EndpointRotator> {
        &self.rotator
    }

    fn registration_payload(&self, instance: &ServiceInstance) -> serde_json::Value {
        serde_json::json!({
            "ID": instance.instance_id(),
            "Name": instance.service_name(),
            "Address": instance.ip(),
            "Port": instance.application_port().number,
            "Meta": metadata::to_metadata(instance),
            "Check": {
                "CheckID": check_id(instance),
                "Name": format!("{} heartbeat", instance.service_name()),
                "TTL": go_duration(self.check_ttl),
                "Status": "passing",
                "DeregisterCriticalServiceAfter": go_duration(self.deregister_after),
            },
        })
    }

    async fn put_registration(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), RemoteError> {
        let url = format!("{}/v1/agent/service/register", endpoint);
        let response = self
            .client
            .put(&url)
            .json(&self.registration_payload(instance))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn discover<T, F, Fut>(&self, call: F) -> std::result::Result<T, RemoteError>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RemoteError>>,
    {
        let result = call(self.rotator.current().to_string()).await;
        if matches!(&result, Err(e) if e.is_connectivity()) {
            self.rotator.advance();
        }
        result
    }

    async fn catalog_service(
        &self,
        endpoint: &str,
        service_name: &str,
    ) -> std::result::Result<Vec<ServiceInstance>, RemoteError> {
        let url = format!("{}/v1/catalog/service/{}", endpoint, service_name);
        debug!("Fetching Consul catalog entries at {}", url);

        let response = self.client.get(&url).send().await?;
        let entries: Vec<serde_json::Value> = check_status(response).await?.json().await?;

        entries
            .into_iter()
            .map(|raw| -> std::result::Result<ServiceInstance, RemoteError> {
                let entry: CatalogService = serde_json::from_value(raw.clone())?;
                Ok(entry.into_instance(raw))
            })
            .collect()
    }

    async fn catalog_services(
        &self,
        endpoint: String,
    ) -> std::result::Result<Vec<ServiceInstance>, RemoteError> {
        let url = format!("{}/v1/catalog/services", endpoint);
        let response = self.client.get(&url).send().await?;
        let services: HashMap<String, Vec<String>> = check_status(response).await?.json().await?;

        let mut names: Vec<String> = services
            .into_keys()
            .filter(|name| name != CONSUL_SERVICE)
            .collect();
        names.sort();

        let mut instances = Vec::new();
        for name in names {
            instances.extend(self.catalog_service(&endpoint, &name).await?);
        }
        Ok(instances)
    }
}

/// Consul answers unknown TTL checks with a 500 on older agents; report it as
/// the 404 it really is.
fn normalize_missing_check(error: RemoteError) -> RemoteError {
    match error {
        RemoteError::Status { status: 500, body } if body.contains("Unknown check") => {
            RemoteError::Status { status: 404, body }
        }
        other => other,
    }
}

#[async_trait]
impl RegistrationBackend for ConsulClient {
    async fn register(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<String, RemoteError> {
        self.put_registration(endpoint, instance).await?;
        info!("Registered service {} with Consul", instance.instance_id());
        Ok(instance.instance_id().to_string())
    }

    async fn find(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<ServiceInstance, RemoteError> {
        let url = format!("{}/v1/agent/service/{}", endpoint, instance.instance_id());

        let response = self.client.get(&url).send().await?;
        let raw: serde_json::Value = check_status(response).await?.json().await?;
        let service: AgentService = serde_json::from_value(raw.clone())?;

        let found = ServiceInstance::new(service.service, service.id, instance.host_name(), service.port)
            .with_ip(service.address);
        Ok(metadata::apply_metadata(found, &service.meta.unwrap_or_default()).with_native(raw))
    }

    async fn heartbeat(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), RemoteError> {
        let url = format!("{}/v1/agent/check/pass/{}", endpoint, check_id(instance));

        let response = self.client.put(&url).send().await?;
        check_status(response).await.map_err(normalize_missing_check)?;
        Ok(())
    }

    async fn update_status(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), RemoteError> {
        // re-registering carries the new status in Meta
        self.put_registration(endpoint, instance).await?;

        let url = format!(
            "{}/v1/agent/service/maintenance/{}",
            endpoint,
            instance.instance_id()
        );
        let enable = instance.status() == InstanceStatus::Down;
        let response = self
            .client
            .put(&url)
            .query(&[
                ("enable", enable.to_string()),
                ("reason", format!("status {}", instance.status())),
            ])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn unregister(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), RemoteError> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            endpoint,
            instance.instance_id()
        );

        let response = self.client.put(&url).send().await?;
        check_status(response).await?;

        info!("Deregistered service {} from Consul", instance.instance_id());
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for ConsulClient {
    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
        let instances = self
            .discover(|endpoint| async move {
                self.catalog_service(&endpoint, query.service_name()).await
            })
            .await?;

        debug!(
            "Discovered {} instances of service {}",
            instances.len(),
            query.service_name()
        );
        version::resolve(&instances, query)
    }

    async fn list_all(&self) -> Result<Vec<ServiceInstance>> {
        Ok(self
            .discover(|endpoint| self.catalog_services(endpoint))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Port;

    fn client() -> ConsulClient {
        let rotator = Arc::new(EndpointRotator::new(["http://localhost:8500"]).unwrap());
        ConsulClient::new(rotator, Duration::from_secs(5), Duration::from_secs(90))
    }

    #[test]
    fn test_registration_payload() {
        let instance = ServiceInstance::new("billing", "BILLING-1", "billing.local", 7000)
            .with_ip("10.0.0.9")
            .with_port(Port::admin(7001))
            .with_version("3.1.0");

        let payload = client().registration_payload(&instance);
        assert_eq!(payload["ID"], "BILLING-1");
        assert_eq!(payload["Name"], "billing");
        assert_eq!(payload["Address"], "10.0.0.9");
        assert_eq!(payload["Port"], 7000);
        assert_eq!(payload["Meta"]["version"], "3.1.0");
        assert_eq!(payload["Meta"]["admin-port"], "7001");
        assert_eq!(payload["Check"]["CheckID"], "service:BILLING-1");
        assert_eq!(payload["Check"]["TTL"], "90s");
        assert_eq!(payload["Check"]["DeregisterCriticalServiceAfter"], "900s");
    }

    #[test]
    fn test_catalog_entry_falls_back_to_node_address() {
        let raw = serde_json::json!({
            "ServiceID": "BILLING-1",
            "ServiceName": "billing",
            "ServiceAddress": "",
            "Address": "10.0.0.2",
            "Node": "node-a",
            "ServicePort": 7000,
            "ServiceMeta": { "version": "1.0.0", "region": "eu" }
        });

        let entry: CatalogService = serde_json::from_value(raw.clone()).unwrap();
        let instance = entry.into_instance(raw);
        assert_eq!(instance.ip(), "10.0.0.2");
        assert_eq!(instance.host_name(), "node-a");
        assert_eq!(instance.version(), Some("1.0.0"));
        assert_eq!(instance.metadata().get("region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn test_unknown_check_is_reported_as_not_found() {
        let err = normalize_missing_check(RemoteError::status(500, "Unknown check \"service:X\""));
        assert!(err.is_not_found());

        let err = normalize_missing_check(RemoteError::status(500, "internal"));
        assert!(!err.is_not_found());
    }
}

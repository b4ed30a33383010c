//! Eureka REST backend (JSON dialect)

use super::{check_status, http_client, RegistrationBackend};
use crate::client::RegistryClient;
use crate::error::{RemoteError, Result};
use crate::instance::{InstanceStatus, Port, PortType, Security, ServiceInstance};
use crate::metadata;
use crate::query::InstanceQuery;
use crate::rotator::EndpointRotator;
use crate::version;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DATA_CENTER_CLASS: &str = "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EurekaInstance {
    instance_id: String,
    host_name: String,
    app: String,
    ip_addr: String,
    status: String,
    port: EurekaPort,
    secure_port: EurekaPort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    health_check_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_page_url: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    data_center_info: DataCenterInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EurekaPort {
    #[serde(rename = "$")]
    port: u16,
    #[serde(rename = "@enabled", serialize_with = "flag_text", deserialize_with = "flag")]
    enabled: bool,
}

impl EurekaPort {
    fn new(port: Port) -> Self {
        Self {
            port: port.number,
            enabled: port.is_present(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataCenterInfo {
    #[serde(rename = "@class")]
    class: String,
    name: String,
}

impl Default for DataCenterInfo {
    fn default() -> Self {
        Self {
            class: DATA_CENTER_CLASS.to_string(),
            name: "MyOwn".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct InstanceEnvelope {
    instance: EurekaInstance,
}

#[derive(Deserialize)]
struct ApplicationEnvelope {
    application: Application,
}

#[derive(Deserialize)]
struct Application {
    #[serde(default, rename = "instance", deserialize_with = "one_or_many")]
    instances: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ApplicationsEnvelope {
    applications: Applications,
}

#[derive(Deserialize)]
struct Applications {
    #[serde(default, rename = "application", deserialize_with = "one_or_many")]
    applications: Vec<Application>,
}

/// Eureka renders booleans as strings and collapses one-element arrays into
/// a bare object; accept both shapes.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => text.eq_ignore_ascii_case("true"),
    })
}

fn flag_text<S: serde::Serializer>(
    value: &bool,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "true" } else { "false" })
}

fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

fn app_name(instance: &ServiceInstance) -> String {
    instance.service_name().to_uppercase()
}

fn to_eureka(instance: &ServiceInstance) -> EurekaInstance {
    let plain = instance
        .ports()
        .iter()
        .find(|p| p.port_type == PortType::Application && p.security == Security::NotSecure)
        .copied()
        .unwrap_or_else(|| Port::absent(PortType::Application));
    let secure = instance
        .ports()
        .iter()
        .find(|p| p.port_type == PortType::Application && p.is_secure())
        .copied()
        .unwrap_or_else(|| Port::absent(PortType::Application).secure());

    let admin_base = {
        let admin = instance.admin_port();
        let port = if admin.is_present() {
            admin
        } else {
            instance.application_port()
        };
        let scheme = if port.is_secure() { "https" } else { "http" };
        format!("{}://{}:{}", scheme, instance.host_name(), port.number)
    };

    EurekaInstance {
        instance_id: instance.instance_id().to_string(),
        host_name: instance.host_name().to_string(),
        app: app_name(instance),
        ip_addr: instance.ip().to_string(),
        status: instance.status().to_string(),
        port: EurekaPort::new(plain),
        secure_port: EurekaPort::new(secure),
        vip_address: Some(instance.service_name().to_lowercase()),
        health_check_url: instance
            .health_path()
            .map(|path| format!("{}{}", admin_base, path)),
        status_page_url: instance
            .status_path()
            .map(|path| format!("{}{}", admin_base, path)),
        metadata: metadata::to_metadata(instance),
        data_center_info: DataCenterInfo::default(),
    }
}

fn from_eureka(raw: serde_json::Value) -> std::result::Result<ServiceInstance, RemoteError> {
    let eureka: EurekaInstance = serde_json::from_value(raw.clone())?;

    let mut instance = ServiceInstance::new(
        eureka.app.to_lowercase(),
        eureka.instance_id,
        eureka.host_name,
        0,
    )
    .with_ip(eureka.ip_addr);

    if eureka.port.enabled {
        instance = instance.with_port(Port::application(eureka.port.port));
    }
    if eureka.secure_port.enabled {
        instance = instance.with_port(Port::application(eureka.secure_port.port).secure());
    }

    // Eureka tags empty maps with a Java class marker
    let mut meta = eureka.metadata;
    meta.remove("@class");

    Ok(metadata::apply_metadata(instance, &meta)
        .with_status(InstanceStatus::from_registry(&eureka.status))
        .with_native(raw))
}

/// Eureka registry client
pub struct EurekaClient {
    rotator: Arc<EndpointRotator>,
    client: reqwest::Client,
}

impl EurekaClient {
    /// Create a client over the given endpoints, e.g. `http://localhost:8761/eureka`.
    pub fn new(rotator: Arc<EndpointRotator>, request_timeout: Duration) -> Self {
        Self {
            rotator,
            client: http_client(request_timeout),
        }
    }

    pub fn rotator(&self) -> &Arc<EndpointRotator> {
        &self.rotator
    }

    /// Discovery calls go to the current endpoint; an unreachable endpoint
    /// rotates the cursor for the next call.
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

    async fn fetch_application(
        &self,
        endpoint: String,
        service_name: &str,
    ) -> std::result::Result<Vec<ServiceInstance>, RemoteError> {
        let url = format!("{}/apps/{}", endpoint, service_name.to_uppercase());
        debug!("Fetching Eureka application at {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let envelope: ApplicationEnvelope = check_status(response).await?.json().await?;
        envelope
            .application
            .instances
            .into_iter()
            .map(from_eureka)
            .collect()
    }

    async fn fetch_applications(
        &self,
        endpoint: String,
    ) -> std::result::Result<Vec<ServiceInstance>, RemoteError> {
        let url = format!("{}/apps", endpoint);
        debug!("Fetching Eureka applications at {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let envelope: ApplicationsEnvelope = check_status(response).await?.json().await?;

        envelope
            .applications
            .applications
            .into_iter()
            .flat_map(|application| application.instances)
            .map(from_eureka)
            .collect()
    }
}

#[async_trait]
impl RegistrationBackend for EurekaClient {
    async fn register(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<String, RemoteError> {
        let url = format!("{}/apps/{}", endpoint, app_name(instance));
        let payload = InstanceEnvelope {
            instance: to_eureka(instance),
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        check_status(response).await?;

        info!(
            "Registered {} with Eureka at {}",
            instance.instance_id(),
            endpoint
        );
        Ok(instance.instance_id().to_string())
    }

    async fn find(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<ServiceInstance, RemoteError> {
        let url = format!(
            "{}/apps/{}/{}",
            endpoint,
            app_name(instance),
            instance.instance_id()
        );

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let envelope: serde_json::Value = check_status(response).await?.json().await?;
        let raw = envelope
            .get("instance")
            .cloned()
            .ok_or_else(|| RemoteError::Decode("missing instance in response".to_string()))?;

        from_eureka(raw)
    }

    async fn heartbeat(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), RemoteError> {
        let url = format!(
            "{}/apps/{}/{}",
            endpoint,
            app_name(instance),
            instance.instance_id()
        );

        let response = self.client.put(&url).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update_status(
        &self,
        endpoint: &str,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), RemoteError> {
        let url = format!(
            "{}/apps/{}/{}/status",
            endpoint,
            app_name(instance),
            instance.instance_id()
        );

        let response = self
            .client
            .put(&url)
            .query(&[("value", instance.status().as_str())])
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
            "{}/apps/{}/{}",
            endpoint,
            app_name(instance),
            instance.instance_id()
        );

        let response = self.client.delete(&url).send().await?;
        check_status(response).await?;

        info!("Unregistered {} from Eureka", instance.instance_id());
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for EurekaClient {
    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
        let instances = self
            .discover(|endpoint| self.fetch_application(endpoint, query.service_name()))
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
            .discover(|endpoint| self.fetch_applications(endpoint))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_serializes_to_eureka_shape() {
        let instance = ServiceInstance::new("orders", "ORDERS-1", "orders.local", 8080)
            .with_ip("10.1.2.3")
            .with_port(Port::admin(9090))
            .with_health_path("/health")
            .with_version("1.4.0")
            .with_status(InstanceStatus::Up);

        let json = serde_json::to_value(InstanceEnvelope {
            instance: to_eureka(&instance),
        })
        .unwrap();

        let body = &json["instance"];
        assert_eq!(body["app"], "ORDERS");
        assert_eq!(body["instanceId"], "ORDERS-1");
        assert_eq!(body["ipAddr"], "10.1.2.3");
        assert_eq!(body["status"], "UP");
        assert_eq!(body["port"]["$"], 8080);
        assert_eq!(body["port"]["@enabled"], "true");
        assert_eq!(body["securePort"]["@enabled"], "false");
        assert_eq!(body["healthCheckUrl"], "http://orders.local:9090/health");
        assert_eq!(body["metadata"]["version"], "1.4.0");
        assert_eq!(body["dataCenterInfo"]["name"], "MyOwn");
    }

    #[test]
    fn test_instance_parses_from_eureka_shape() {
        let raw = serde_json::json!({
            "instanceId": "ORDERS-2",
            "hostName": "orders-2.local",
            "app": "ORDERS",
            "ipAddr": "10.1.2.4",
            "status": "OUT_OF_SERVICE",
            "port": { "$": 8080, "@enabled": "true" },
            "securePort": { "$": 8443, "@enabled": "true" },
            "metadata": { "version": "2.0.0", "team": "payments" },
            "dataCenterInfo": { "@class": DATA_CENTER_CLASS, "name": "MyOwn" }
        });

        let instance = from_eureka(raw).unwrap();
        assert_eq!(instance.service_name(), "orders");
        assert_eq!(instance.instance_id(), "ORDERS-2");
        assert_eq!(instance.status(), InstanceStatus::Down);
        assert_eq!(instance.version(), Some("2.0.0"));
        assert_eq!(instance.application_port().number, 8443);
        assert_eq!(instance.metadata().get("team").map(String::as_str), Some("payments"));
        assert!(instance.native().is_some());
    }

    #[test]
    fn test_single_instance_application_is_accepted() {
        let body = serde_json::json!({
            "application": {
                "name": "ORDERS",
                "instance": {
                    "instanceId": "ORDERS-1",
                    "hostName": "h",
                    "app": "ORDERS",
                    "ipAddr": "10.0.0.1",
                    "status": "UP",
                    "port": { "$": 80, "@enabled": "true" },
                    "securePort": { "$": 443, "@enabled": "false" },
                    "metadata": { "@class": "java.util.Collections$EmptyMap" }
                }
            }
        });

        let envelope: ApplicationEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.application.instances.len(), 1);

        let instance = from_eureka(envelope.application.instances[0].clone()).unwrap();
        assert!(instance.metadata().is_empty());
    }
}

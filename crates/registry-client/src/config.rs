//! Registrar configuration, read from the environment or deserialized.

use crate::backend::{ConsulClient, EurekaClient, RegistrationBackend};
use crate::client::Backend;
use crate::error::{RegistryError, Result};
use crate::instance::{Port, ServiceInstance};
use crate::lifecycle::{LifecycleSettings, RegistrationLifecycle};
use crate::retry::RetryPolicy;
use crate::rotator::EndpointRotator;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EUREKA_ENDPOINT: &str = "http://localhost:8761/eureka";

/// Consul TTL checks outlive this many missed heartbeats.
const CONSUL_TTL_HEARTBEATS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Eureka,
    Consul,
}

impl FromStr for BackendKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "eureka" => Ok(BackendKind::Eureka),
            "consul" => Ok(BackendKind::Consul),
            other => Err(RegistryError::Configuration(format!(
                "unknown registry backend: {}",
                other
            ))),
        }
    }
}

/// The instance this process registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    pub name: String,
    pub host: String,
    pub ip: Option<String>,
    pub port: u16,
    pub secure: bool,
    pub admin_port: Option<u16>,
    pub version: Option<String>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: local_hostname(),
            ip: None,
            port: 8080,
            secure: false,
            admin_port: None,
            version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    pub backend: BackendKind,
    pub endpoints: Vec<String>,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub register: RetryPolicy,
    pub confirm: RetryPolicy,
    pub update_status: RetryPolicy,
    pub unregister: RetryPolicy,
    pub instance: InstanceSettings,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        let settings = LifecycleSettings::default();
        Self {
            backend: BackendKind::Eureka,
            endpoints: vec![DEFAULT_EUREKA_ENDPOINT.to_string()],
            heartbeat_interval_secs: settings.heartbeat_interval.as_secs(),
            request_timeout_secs: 10,
            register: settings.register,
            confirm: settings.confirm,
            update_status: settings.update_status,
            unregister: settings.unregister,
            instance: InstanceSettings::default(),
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .unwrap_or_else(|_| std::ffi::OsString::from("localhost"))
        .to_string_lossy()
        .to_string()
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        RegistryError::Configuration(format!("{} has an invalid value: {}", key, value))
    })
}

impl RegistrarConfig {
    /// Read `REGISTRY_*` and `SERVICE_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = lookup("REGISTRY_BACKEND") {
            config.backend = backend.parse()?;
            if config.backend == BackendKind::Consul && lookup("REGISTRY_ENDPOINTS").is_none() {
                config.endpoints = vec!["http://localhost:8500".to_string()];
            }
        }
        if let Some(endpoints) = lookup("REGISTRY_ENDPOINTS") {
            config.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(secs) = lookup("REGISTRY_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval_secs = parse("REGISTRY_HEARTBEAT_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("REGISTRY_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = parse("REGISTRY_REQUEST_TIMEOUT_SECS", &secs)?;
        }

        let instance = &mut config.instance;
        if let Some(name) = lookup("SERVICE_NAME") {
            instance.name = name;
        }
        if let Some(host) = lookup("SERVICE_HOST") {
            instance.host = host;
        }
        instance.ip = lookup("SERVICE_IP").or(instance.ip.take());
        if let Some(port) = lookup("SERVICE_PORT") {
            instance.port = parse("SERVICE_PORT", &port)?;
        }
        if let Some(secure) = lookup("SERVICE_SECURE") {
            instance.secure = parse("SERVICE_SECURE", &secure)?;
        }
        if let Some(port) = lookup("SERVICE_ADMIN_PORT") {
            instance.admin_port = Some(parse("SERVICE_ADMIN_PORT", &port)?);
        }
        instance.version = lookup("SERVICE_VERSION").or(instance.version.take());

        debug!(
            backend = ?config.backend,
            endpoints = ?config.endpoints,
            "Loaded registrar configuration"
        );
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            heartbeat_interval: self.heartbeat_interval(),
            register: self.register,
            confirm: self.confirm,
            update_status: self.update_status,
            unregister: self.unregister,
        }
    }

    pub fn rotator(&self) -> Result<Arc<EndpointRotator>> {
        Ok(Arc::new(EndpointRotator::new(&self.endpoints)?))
    }

    /// The configured instance, before the registry has assigned it an id.
    /// The provisional id is `{host}-{pid}`.
    pub fn instance(&self) -> Result<ServiceInstance> {
        let settings = &self.instance;
        if settings.name.trim().is_empty() {
            return Err(RegistryError::Configuration(
                "a service name is required (SERVICE_NAME)".to_string(),
            ));
        }

        let provisional_id = format!("{}-{}", settings.host, std::process::id());
        let mut instance =
            ServiceInstance::new(&settings.name, provisional_id, &settings.host, settings.port);
        if settings.secure {
            instance = instance.with_port(Port::application(settings.port).secure());
        }
        if let Some(ip) = &settings.ip {
            instance = instance.with_ip(ip);
        }
        if let Some(admin_port) = settings.admin_port {
            instance = instance.with_port(Port::admin(admin_port));
        }
        if let Some(version) = &settings.version {
            instance = instance.with_version(version);
        }
        Ok(instance)
    }

    fn consul(&self, rotator: Arc<EndpointRotator>) -> ConsulClient {
        let ttl = self.heartbeat_interval() * CONSUL_TTL_HEARTBEATS;
        ConsulClient::new(rotator, self.request_timeout(), ttl)
    }

    pub fn build_backend(&self, rotator: Arc<EndpointRotator>) -> Arc<dyn RegistrationBackend> {
        match self.backend {
            BackendKind::Eureka => Arc::new(EurekaClient::new(rotator, self.request_timeout())),
            BackendKind::Consul => Arc::new(self.consul(rotator)),
        }
    }

    /// A discovery client over the configured endpoints.
    pub fn build_client(&self) -> Result<Backend> {
        let rotator = self.rotator()?;
        Ok(match self.backend {
            BackendKind::Eureka => EurekaClient::new(rotator, self.request_timeout()).into(),
            BackendKind::Consul => self.consul(rotator).into(),
        })
    }

    pub fn build_lifecycle(&self) -> Result<RegistrationLifecycle> {
        let rotator = self.rotator()?;
        let backend = self.build_backend(Arc::clone(&rotator));
        Ok(RegistrationLifecycle::new(backend, rotator, self.settings()))
    }
}

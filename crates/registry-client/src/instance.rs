use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
        }
    }

    /// Maps a registry status string onto the three states we track.
    /// Anything that is neither UP nor STARTING (OUT_OF_SERVICE, UNKNOWN, ...)
    /// counts as DOWN.
    pub fn from_registry(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "UP" | "PASSING" => InstanceStatus::Up,
            "STARTING" => InstanceStatus::Starting,
            _ => InstanceStatus::Down,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortType {
    Application,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Security {
    Secure,
    NotSecure,
}

/// A network port exposed by an instance. A zero number means "not present".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub port_type: PortType,
    pub security: Security,
}

impl Port {
    pub fn new(number: u16, port_type: PortType, security: Security) -> Self {
        Self {
            number,
            port_type,
            security,
        }
    }

    pub fn application(number: u16) -> Self {
        Self::new(number, PortType::Application, Security::NotSecure)
    }

    pub fn admin(number: u16) -> Self {
        Self::new(number, PortType::Admin, Security::NotSecure)
    }

    /// Placeholder returned when an instance has no port of the requested type.
    pub fn absent(port_type: PortType) -> Self {
        Self::new(0, port_type, Security::NotSecure)
    }

    pub fn secure(mut self) -> Self {
        self.security = Security::Secure;
        self
    }

    pub fn is_present(&self) -> bool {
        self.number != 0
    }

    pub fn is_secure(&self) -> bool {
        self.security == Security::Secure
    }
}

/// A service instance as seen by a registry.
///
/// Values are immutable: every `with_*` call hands back a new instance and
/// leaves nothing shared behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    instance_id: String,
    service_name: String,
    host_name: String,
    ip: String,
    ports: Vec<Port>,
    status: InstanceStatus,
    version: Option<String>,
    commit: Option<String>,
    description: Option<String>,
    health_path: Option<String>,
    status_path: Option<String>,
    metadata: BTreeMap<String, String>,
    up_since: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    native: Option<serde_json::Value>,
}

impl ServiceInstance {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        host_name: impl Into<String>,
        port: u16,
    ) -> Self {
        let host_name = host_name.into();
        Self {
            instance_id: instance_id.into(),
            service_name: service_name.into(),
            ip: host_name.clone(),
            host_name,
            ports: vec![Port::application(port)],
            status: InstanceStatus::Starting,
            version: None,
            commit: None,
            description: None,
            health_path: None,
            status_path: None,
            metadata: BTreeMap::new(),
            up_since: Utc::now(),
            native: None,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Adds a port, replacing any existing port with the same type and security.
    pub fn with_port(mut self, port: Port) -> Self {
        match self
            .ports
            .iter_mut()
            .find(|p| p.port_type == port.port_type && p.security == port.security)
        {
            Some(existing) => *existing = port,
            None => self.ports.push(port),
        }
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = Some(path.into());
        self
    }

    pub fn with_status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_up_since(mut self, up_since: DateTime<Utc>) -> Self {
        self.up_since = up_since;
        self
    }

    pub fn with_native(mut self, native: serde_json::Value) -> Self {
        self.native = Some(native);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn health_path(&self) -> Option<&str> {
        self.health_path.as_deref()
    }

    pub fn status_path(&self) -> Option<&str> {
        self.status_path.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn up_since(&self) -> DateTime<Utc> {
        self.up_since
    }

    pub fn native(&self) -> Option<&serde_json::Value> {
        self.native.as_ref()
    }

    /// The port of the given type: secure if there is one, otherwise the
    /// plain one, otherwise [`Port::absent`].
    pub fn port(&self, port_type: PortType) -> Port {
        let mut fallback = None;
        for port in self.ports.iter().filter(|p| p.port_type == port_type) {
            if port.is_secure() {
                return *port;
            }
            fallback.get_or_insert(*port);
        }
        fallback.unwrap_or_else(|| Port::absent(port_type))
    }

    pub fn application_port(&self) -> Port {
        self.port(PortType::Application)
    }

    pub fn admin_port(&self) -> Port {
        self.port(PortType::Admin)
    }

    /// Base URL of the application port.
    pub fn url(&self) -> String {
        let port = self.application_port();
        let scheme = if port.is_secure() { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host_name, port.number)
    }
}

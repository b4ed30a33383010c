pub mod backend;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod instance;
pub mod lifecycle;
pub mod metadata;
pub mod query;
pub mod retry;
pub mod rotator;
pub mod version;

#[cfg(test)]
mod testing;

pub use backend::{ConsulClient, EurekaClient, RegistrationBackend};
pub use bootstrap::{bootstrap_service, get_service_endpoint};
pub use client::{Backend, FanoutClient, FixedClient, NoopClient, RegistryClient};
pub use config::{BackendKind, RegistrarConfig};
pub use error::{RegistryError, RemoteError, Result};
pub use heartbeat::{HeartbeatObserver, SelfHealOutcome};
pub use instance::{InstanceStatus, Port, PortType, Security, ServiceInstance};
pub use lifecycle::{LifecycleSettings, RegistrationLifecycle, RegistrationState};
pub use query::InstanceQuery;
pub use retry::RetryPolicy;
pub use rotator::EndpointRotator;

// Re-export the macro
pub use registry_client_macros::register_service;

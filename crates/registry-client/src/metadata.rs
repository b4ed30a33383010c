//! Well-known metadata keys carried alongside an instance in the registry.
//!
//! Registries only store flat string maps, so the instance fields that have no
//! native slot (version, commit, paths, admin port, ...) travel as metadata.
//! Keys not listed here pass through untouched.

use crate::instance::{InstanceStatus, Port, ServiceInstance};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const VERSION: &str = "version";
pub const COMMIT: &str = "commit";
pub const DESCRIPTION: &str = "description";
pub const HEALTH_PATH: &str = "health-path";
pub const STATUS_PATH: &str = "status-path";
pub const ADMIN_PORT: &str = "admin-port";
pub const ADMIN_PORT_SECURE: &str = "admin-port-secure";
pub const STATUS: &str = "status";
pub const UP_SINCE: &str = "up-since";

pub const WELL_KNOWN: &[&str] = &[
    VERSION,
    COMMIT,
    DESCRIPTION,
    HEALTH_PATH,
    STATUS_PATH,
    ADMIN_PORT,
    ADMIN_PORT_SECURE,
    STATUS,
    UP_SINCE,
];

/// Flatten an instance's extra fields and opaque metadata into one map.
pub fn to_metadata(instance: &ServiceInstance) -> BTreeMap<String, String> {
    let mut metadata = instance.metadata().clone();
    let mut put = |key: &str, value: Option<&str>| {
        if let Some(value) = value {
            metadata.insert(key.to_string(), value.to_string());
        }
    };

    put(VERSION, instance.version());
    put(COMMIT, instance.commit());
    put(DESCRIPTION, instance.description());
    put(HEALTH_PATH, instance.health_path());
    put(STATUS_PATH, instance.status_path());

    let admin = instance.admin_port();
    if admin.is_present() {
        metadata.insert(ADMIN_PORT.to_string(), admin.number.to_string());
        metadata.insert(ADMIN_PORT_SECURE.to_string(), admin.is_secure().to_string());
    }
    metadata.insert(STATUS.to_string(), instance.status().to_string());
    metadata.insert(UP_SINCE.to_string(), instance.up_since().to_rfc3339());

    metadata
}

/// Apply a registry metadata map to `instance`: well-known keys fill their
/// fields, everything else lands in the instance metadata.
pub fn apply_metadata(
    mut instance: ServiceInstance,
    metadata: &BTreeMap<String, String>,
) -> ServiceInstance {
    if let Some(version) = metadata.get(VERSION) {
        instance = instance.with_version(version.as_str());
    }
    if let Some(commit) = metadata.get(COMMIT) {
        instance = instance.with_commit(commit.as_str());
    }
    if let Some(description) = metadata.get(DESCRIPTION) {
        instance = instance.with_description(description.as_str());
    }
    if let Some(path) = metadata.get(HEALTH_PATH) {
        instance = instance.with_health_path(path.as_str());
    }
    if let Some(path) = metadata.get(STATUS_PATH) {
        instance = instance.with_status_path(path.as_str());
    }
    if let Some(number) = metadata.get(ADMIN_PORT).and_then(|p| p.parse::<u16>().ok()) {
        let port = Port::admin(number);
        let secure = metadata
            .get(ADMIN_PORT_SECURE)
            .is_some_and(|s| s.eq_ignore_ascii_case("true"));
        instance = instance.with_port(if secure { port.secure() } else { port });
    }
    if let Some(status) = metadata.get(STATUS) {
        instance = instance.with_status(InstanceStatus::from_registry(status));
    }
    if let Some(up_since) = metadata
        .get(UP_SINCE)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        instance = instance.with_up_since(up_since.with_timezone(&Utc));
    }

    for (key, value) in metadata {
        if !WELL_KNOWN.contains(&key.as_str()) {
            instance = instance.with_metadata(key.as_str(), value.as_str());
        }
    }
    instance
}

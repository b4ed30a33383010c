use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};

/// Which instances of a service a caller is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceQuery {
    service_name: String,
    minimum_version: Option<String>,
    preferred_version: Option<String>,
}

impl InstanceQuery {
    pub fn new(service_name: impl Into<String>) -> Result<Self> {
        let service_name = service_name.into();
        if service_name.trim().is_empty() {
            return Err(RegistryError::Configuration(
                "instance query requires a service name".to_string(),
            ));
        }

        Ok(Self {
            service_name,
            minimum_version: None,
            preferred_version: None,
        })
    }

    pub fn with_minimum_version(mut self, version: impl Into<String>) -> Self {
        self.minimum_version = non_blank(version.into());
        self
    }

    pub fn with_preferred_version(mut self, version: impl Into<String>) -> Self {
        self.preferred_version = non_blank(version.into());
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn minimum_version(&self) -> Option<&str> {
        self.minimum_version.as_deref()
    }

    pub fn preferred_version(&self) -> Option<&str> {
        self.preferred_version.as_deref()
    }

    pub fn has_no_minimum(&self) -> bool {
        self.minimum_version.is_none()
    }

    pub fn has_no_preferred(&self) -> bool {
        self.preferred_version.is_none()
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_service_name_is_rejected() {
        assert!(matches!(
            InstanceQuery::new("  "),
            Err(RegistryError::Configuration(_))
        ));
    }

    #[test]
    fn test_version_predicates() {
        let query = InstanceQuery::new("billing").unwrap();
        assert!(query.has_no_minimum());
        assert!(query.has_no_preferred());

        let query = query
            .with_minimum_version("1.0.0")
            .with_preferred_version("");
        assert!(!query.has_no_minimum());
        assert!(query.has_no_preferred());
    }
}

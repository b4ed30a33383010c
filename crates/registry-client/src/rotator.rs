use crate::error::{RegistryError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use url::Url;

/// Round-robin cursor over a fixed list of registry base URLs.
///
/// `current` is lock free; `advance` is serialized so concurrent callers each
/// move the cursor exactly one slot.
#[derive(Debug)]
pub struct EndpointRotator {
    endpoints: Vec<String>,
    index: AtomicUsize,
    cycle: Mutex<()>,
}

impl EndpointRotator {
    /// Create a rotator over `endpoints`, in order.
    ///
    /// Every entry must be an absolute URL; trailing slashes are dropped.
    pub fn new<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| normalize(endpoint.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if endpoints.is_empty() {
            return Err(RegistryError::Configuration(
                "at least one registry endpoint is required".to_string(),
            ));
        }

        Ok(Self {
            endpoints,
            index: AtomicUsize::new(0),
            cycle: Mutex::new(()),
        })
    }

    pub fn current(&self) -> &str {
        &self.endpoints[self.index.load(Ordering::Acquire)]
    }

    /// Move to the next endpoint, wrapping after the last one.
    pub fn advance(&self) -> &str {
        let _cycle = self.cycle.lock();
        let next = (self.index.load(Ordering::Acquire) + 1) % self.endpoints.len();
        self.index.store(next, Ordering::Release);
        debug!("Rotated registry endpoint to {}", self.endpoints[next]);
        &self.endpoints[next]
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

fn normalize(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim();
    Url::parse(trimmed).map_err(|e| {
        RegistryError::Configuration(format!("invalid registry endpoint {:?}: {}", trimmed, e))
    })?;
    Ok(trimmed.trim_end_matches('/').to_string())
}

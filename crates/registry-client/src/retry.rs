//! Bounded fixed-delay retries around registry calls.

use crate::error::{Operation, RegistryError, RemoteError, Result};
use crate::rotator::EndpointRotator;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Gateway-class responses that usually mean "try another node".
pub const RETRYABLE_STATUSES: &[u16] = &[502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

/// Decide whether a failed attempt is worth repeating.
pub fn classify(error: &RemoteError) -> Classification {
    match error {
        RemoteError::Connect(_)
        | RemoteError::Timeout(_)
        | RemoteError::Tls(_)
        | RemoteError::Dns(_) => Classification::Retryable,
        RemoteError::Status { status, .. } if RETRYABLE_STATUSES.contains(status) => {
            Classification::Retryable
        }
        RemoteError::Status { .. } | RemoteError::Decode(_) => Classification::Fatal,
    }
}

/// Like [`classify`], but a 404 is retryable. Used while waiting for a fresh
/// registration to become visible.
pub fn classify_awaiting_visibility(error: &RemoteError) -> Classification {
    if error.is_not_found() {
        Classification::Retryable
    } else {
        classify(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "delay_ms", with = "millis")]
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }

    /// Run `attempt` against the rotator's current endpoint until it succeeds,
    /// fails fatally, or the attempts run out. Every failed attempt advances
    /// the rotator.
    pub async fn run<T, F, Fut>(
        &self,
        operation: Operation,
        rotator: &EndpointRotator,
        attempt: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        self.run_classified(operation, rotator, classify, attempt).await
    }

    pub async fn run_classified<T, F, Fut, C>(
        &self,
        operation: Operation,
        rotator: &EndpointRotator,
        classifier: C,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
        C: Fn(&RemoteError) -> Classification,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let endpoint = rotator.current().to_string();
            debug!(%operation, attempt = attempts, %endpoint, "Calling registry");

            let error = match attempt(endpoint.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if classifier(&error) == Classification::Fatal {
                warn!(%operation, %endpoint, "Registry call failed, not retrying: {}", error);
                return Err(RegistryError::Rejected {
                    operation,
                    source: error,
                });
            }

            rotator.advance();

            if attempts >= max_attempts {
                warn!(%operation, attempts, "Giving up on registry call: {}", error);
                return Err(RegistryError::Exhausted {
                    operation,
                    attempts,
                    source: error,
                });
            }

            warn!(
                "Failed to {} (attempt {}/{}) against {}: {}",
                operation, attempts, max_attempts, endpoint, error
            );
            tokio::time::sleep(self.delay).await;
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rotator() -> EndpointRotator {
        EndpointRotator::new(["http://a", "http://b"]).unwrap()
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(&RemoteError::Connect("refused".into())), Classification::Retryable);
        assert_eq!(classify(&RemoteError::Timeout("slow".into())), Classification::Retryable);
        assert_eq!(classify(&RemoteError::Tls("bad cert".into())), Classification::Retryable);
        assert_eq!(classify(&RemoteError::Dns("nxdomain".into())), Classification::Retryable);
        assert_eq!(classify(&RemoteError::status(503, "")), Classification::Retryable);
        assert_eq!(classify(&RemoteError::status(500, "")), Classification::Fatal);
        assert_eq!(classify(&RemoteError::status(404, "")), Classification::Fatal);
        assert_eq!(classify(&RemoteError::Decode("junk".into())), Classification::Fatal);
        assert_eq!(
            classify_awaiting_visibility(&RemoteError::status(404, "")),
            Classification::Retryable
        );
    }

    #[test]
    fn test_policy_never_has_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).max_attempts, 1);
        assert_eq!(
            RetryPolicy::new(4, Duration::from_millis(250)).budget(),
            Duration::from_millis(750)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let rotator = rotator();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let seen = calls.clone();
        let result = policy
            .run(Operation::Register, &rotator, move |endpoint| {
                let call = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(RemoteError::Connect(endpoint))
                    } else {
                        Ok(endpoint)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "http://a");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_attempts() {
        let rotator = rotator();
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<()> = policy
            .run(Operation::Unregister, &rotator, |_| async {
                Err(RemoteError::status(503, "unavailable"))
            })
            .await;

        match result {
            Err(RegistryError::Exhausted {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, Operation::Unregister);
                assert_eq!(attempts, 3);
                assert_eq!(source, RemoteError::status(503, "unavailable"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // three failures, three advances over two endpoints
        assert_eq!(rotator.current(), "http://b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let rotator = rotator();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let seen = calls.clone();
        let result: Result<()> = policy
            .run(Operation::UpdateStatus, &rotator, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::status(500, "boom")) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RegistryError::Rejected {
                operation: Operation::UpdateStatus,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rotator.current(), "http://a");
    }
}

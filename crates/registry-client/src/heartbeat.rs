//! Periodic heartbeats for a live registration, with self-healing when the
//! registry loses the lease.

use crate::error::RemoteError;
use crate::instance::{InstanceStatus, ServiceInstance};
use crate::lifecycle::Shared;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive failed heartbeats tolerated before self-healing kicks in.
pub const FAILURE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfHealOutcome {
    /// The lease was gone and a fresh registration replaced it.
    Succeeded,
    /// The lease was gone and re-registering failed.
    Failed,
    /// The failure is not something re-registering can fix (network
    /// partition, unexpected error).
    CannotSelfHeal,
}

/// Hooks for metrics around the heartbeat loop. Both default to no-ops.
pub trait HeartbeatObserver: Send + Sync {
    fn heartbeat_sent(&self, _instance: &ServiceInstance) {}

    fn self_healing(&self, _instance: &ServiceInstance, _outcome: SelfHealOutcome) {}
}

impl HeartbeatObserver for () {}

/// Owner's side of a running monitor.
pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait until the task has observed it.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("Heartbeat monitor panicked: {}", e);
            }
        }
    }
}

enum Tick {
    Continue,
    /// The lease this monitor heartbeats is gone: either a fresh registration
    /// took over, or re-registering failed and nothing is left to keep alive.
    Stop,
}

pub(crate) struct HeartbeatMonitor {
    shared: Arc<Shared>,
    instance: ServiceInstance,
    cancel: CancellationToken,
    consecutive_failures: u32,
    failing_since: Option<Instant>,
}

impl HeartbeatMonitor {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        instance: ServiceInstance,
        period: Duration,
    ) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let monitor = HeartbeatMonitor {
            shared,
            instance,
            cancel: cancel.clone(),
            consecutive_failures: 0,
            failing_since: None,
        };

        let task = tokio::spawn(monitor.run(period));
        MonitorHandle { cancel, task }
    }

    async fn run(mut self, period: Duration) {
        let cancel = self.cancel.clone();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            instance_id = %self.instance.instance_id(),
            "Heartbeat monitor started, every {:?}", period
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let tick = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                tick = self.tick() => tick,
            };
            if let Tick::Stop = tick {
                break;
            }
        }

        debug!(
            instance_id = %self.instance.instance_id(),
            "Heartbeat monitor stopped"
        );
    }

    async fn tick(&mut self) -> Tick {
        let endpoint = self.shared.rotator().current().to_string();

        match self.shared.backend().heartbeat(&endpoint, &self.instance).await {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        instance_id = %self.instance.instance_id(),
                        "Heartbeat recovered after {} failures", self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.failing_since = None;
                self.shared.observer().heartbeat_sent(&self.instance);
                Tick::Continue
            }
            Err(error) => {
                self.consecutive_failures += 1;
                self.shared.rotator().advance();
                let since = *self.failing_since.get_or_insert_with(Instant::now);

                warn!(
                    instance_id = %self.instance.instance_id(),
                    failures = self.consecutive_failures,
                    "Heartbeat to {} failed, failing for {:?}: {}",
                    endpoint,
                    since.elapsed(),
                    error
                );

                if self.consecutive_failures > FAILURE_THRESHOLD {
                    self.self_heal(&error).await
                } else {
                    Tick::Continue
                }
            }
        }
    }

    async fn self_heal(&mut self, error: &RemoteError) -> Tick {
        // Drop the registered mark first so a re-register is legal and the
        // caller never believes a lapsed lease is live.
        if let Some(latest) = self.shared.mark_unregistered(self.instance.instance_id()) {
            self.instance = latest;
        }

        if error.is_connectivity() {
            warn!(
                instance_id = %self.instance.instance_id(),
                "Cannot self-heal, registry unreachable: {}", error
            );
            return self.report(SelfHealOutcome::CannotSelfHeal);
        }
        if !error.is_not_found() {
            warn!(
                instance_id = %self.instance.instance_id(),
                "Cannot self-heal after unexpected heartbeat error: {}", error
            );
            return self.report(SelfHealOutcome::CannotSelfHeal);
        }

        info!(
            instance_id = %self.instance.instance_id(),
            "Registry no longer knows this instance, re-registering"
        );
        let candidate = self.instance.clone().with_status(InstanceStatus::Up);

        match self
            .shared
            .register_instance(candidate, Some(&self.cancel))
            .await
        {
            Ok((registered, previous)) => {
                // `previous` is this monitor; it must not wait on itself
                if let Some(previous) = previous {
                    previous.cancel();
                }
                info!(
                    instance_id = %registered.instance_id(),
                    "Self-healing succeeded"
                );
                self.report(SelfHealOutcome::Succeeded);
                Tick::Stop
            }
            Err(e) => {
                error!(
                    instance_id = %self.instance.instance_id(),
                    "Self-healing failed, stopping heartbeats: {}", e
                );
                self.report(SelfHealOutcome::Failed);
                Tick::Stop
            }
        }
    }

    fn report(&self, outcome: SelfHealOutcome) -> Tick {
        self.shared.observer().self_healing(&self.instance, outcome);
        Tick::Continue
    }
}

//! Registration lifecycle: register, confirm, heartbeat, update, unregister.

use crate::backend::RegistrationBackend;
use crate::error::{Operation, RegistryError, Result};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatObserver, MonitorHandle};
use crate::instance::{InstanceStatus, ServiceInstance};
use crate::retry::{classify_awaiting_visibility, RetryPolicy};
use crate::rotator::EndpointRotator;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing and retry knobs for one lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub heartbeat_interval: Duration,
    pub register: RetryPolicy,
    pub confirm: RetryPolicy,
    pub update_status: RetryPolicy,
    pub unregister: RetryPolicy,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            register: RetryPolicy::new(60, Duration::from_secs(5)),
            confirm: RetryPolicy::new(30, Duration::from_secs(2)),
            update_status: RetryPolicy::new(10, Duration::from_secs(1)),
            unregister: RetryPolicy::new(3, Duration::from_millis(500)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    AwaitingConfirmation,
    Registered,
}

enum Phase {
    Unregistered,
    Registering,
    AwaitingConfirmation,
    Registered(ServiceInstance),
}

struct Slot {
    phase: Phase,
    monitor: Option<MonitorHandle>,
}

/// State shared between a lifecycle and its heartbeat monitor.
pub(crate) struct Shared {
    backend: Arc<dyn RegistrationBackend>,
    rotator: Arc<EndpointRotator>,
    settings: LifecycleSettings,
    observer: Arc<dyn HeartbeatObserver>,
    slot: Mutex<Slot>,
}

/// An in-progress registration. Dropping it without committing puts the
/// slot back to `Unregistered`, including when the registering future is
/// cancelled mid-flight.
struct Claim<'a> {
    shared: &'a Shared,
    committed: bool,
}

impl Claim<'_> {
    fn awaiting_confirmation(&self) {
        self.shared.slot.lock().phase = Phase::AwaitingConfirmation;
    }

    /// Store the confirmed instance and start its heartbeat monitor.
    /// Returns the monitor it replaced, if any.
    ///
    /// A self-healing monitor passes its own token: if it was cancelled in
    /// the meantime the registration is not installed.
    fn commit(
        mut self,
        shared: &Arc<Shared>,
        registered: ServiceInstance,
        superseding: Option<&CancellationToken>,
    ) -> Result<Option<MonitorHandle>> {
        let mut slot = self.shared.slot.lock();
        if superseding.is_some_and(|token| token.is_cancelled()) {
            return Err(RegistryError::IllegalState(
                "registration was stopped while self-healing".to_string(),
            ));
        }

        let monitor = HeartbeatMonitor::spawn(
            Arc::clone(shared),
            registered.clone(),
            self.shared.settings.heartbeat_interval,
        );
        slot.phase = Phase::Registered(registered);
        self.committed = true;
        Ok(slot.monitor.replace(monitor))
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slot = self.shared.slot.lock();
        if matches!(slot.phase, Phase::Registering | Phase::AwaitingConfirmation) {
            slot.phase = Phase::Unregistered;
        }
    }
}

fn registration_id(service_name: &str) -> String {
    format!("{}-{}", service_name, Utc::now().format("%Y%m%d%H%M%S%3f")).to_uppercase()
}

impl Shared {
    pub(crate) fn backend(&self) -> &dyn RegistrationBackend {
        self.backend.as_ref()
    }

    pub(crate) fn rotator(&self) -> &EndpointRotator {
        &self.rotator
    }

    pub(crate) fn observer(&self) -> &dyn HeartbeatObserver {
        self.observer.as_ref()
    }

    fn claim(&self) -> Result<Claim<'_>> {
        let mut slot = self.slot.lock();
        match &slot.phase {
            Phase::Unregistered => {
                slot.phase = Phase::Registering;
                Ok(Claim {
                    shared: self,
                    committed: false,
                })
            }
            Phase::Registered(instance) => Err(RegistryError::IllegalState(format!(
                "{} is already registered",
                instance.instance_id()
            ))),
            Phase::Registering | Phase::AwaitingConfirmation => Err(RegistryError::IllegalState(
                "a registration is already in progress".to_string(),
            )),
        }
    }

    fn registered(&self) -> Option<ServiceInstance> {
        match &self.slot.lock().phase {
            Phase::Registered(instance) => Some(instance.clone()),
            _ => None,
        }
    }

    /// Flip a registered instance back to unregistered, returning the last
    /// stored copy. A no-op if `instance_id` is no longer the live one.
    pub(crate) fn mark_unregistered(&self, instance_id: &str) -> Option<ServiceInstance> {
        let mut slot = self.slot.lock();
        match &slot.phase {
            Phase::Registered(instance) if instance.instance_id() == instance_id => {
                let instance = instance.clone();
                slot.phase = Phase::Unregistered;
                Some(instance)
            }
            _ => None,
        }
    }

    /// Register `candidate` and wait until the registry reports it.
    ///
    /// On success the instance is stored, a heartbeat monitor runs for it,
    /// and the monitor it displaced (if any) is handed back to the caller to
    /// stop.
    pub(crate) async fn register_instance(
        self: &Arc<Self>,
        candidate: ServiceInstance,
        superseding: Option<&CancellationToken>,
    ) -> Result<(ServiceInstance, Option<MonitorHandle>)> {
        let claim = self.claim()?;

        let id = registration_id(candidate.service_name());
        let candidate = candidate.with_instance_id(id);
        info!(
            "Registering {} as {}",
            candidate.service_name(),
            candidate.instance_id()
        );

        let backend = &self.backend;
        let pending = &candidate;
        let assigned = self
            .settings
            .register
            .run(Operation::Register, &self.rotator, move |endpoint| async move {
                backend.register(&endpoint, pending).await
            })
            .await?;

        let candidate = candidate.with_instance_id(assigned);
        claim.awaiting_confirmation();

        let pending = &candidate;
        let confirmed = self
            .settings
            .confirm
            .run_classified(
                Operation::AwaitConfirmation,
                &self.rotator,
                classify_awaiting_visibility,
                move |endpoint| async move { backend.find(&endpoint, pending).await },
            )
            .await;

        let seen = match confirmed {
            Ok(seen) => seen,
            Err(e) => {
                self.abandon(&candidate).await;
                return Err(e);
            }
        };
        debug!(
            instance_id = %candidate.instance_id(),
            "Registry reports status {}", seen.status()
        );

        // keep our own view of the instance, plus the registry's raw record
        let mut registered = candidate.with_up_since(Utc::now());
        if let Some(native) = seen.native() {
            registered = registered.with_native(native.clone());
        }
        let previous = match claim.commit(self, registered.clone(), superseding) {
            Ok(previous) => previous,
            Err(e) => {
                self.abandon(&registered).await;
                return Err(e);
            }
        };

        info!(
            instance_id = %registered.instance_id(),
            "Registered {} with status {}",
            registered.service_name(),
            registered.status()
        );
        Ok((registered, previous))
    }

    /// One unretried unregister so a registration we gave up on does not
    /// linger in the registry.
    async fn abandon(&self, instance: &ServiceInstance) {
        let endpoint = self.rotator.current().to_string();
        match self.backend.unregister(&endpoint, instance).await {
            Ok(()) => info!(
                instance_id = %instance.instance_id(),
                "Removed unconfirmed registration"
            ),
            Err(e) => warn!(
                instance_id = %instance.instance_id(),
                "Failed to remove unconfirmed registration: {}", e
            ),
        }
    }

    fn take_monitor(&self) -> Option<MonitorHandle> {
        let monitor = self.slot.lock().monitor.take();
        if let Some(monitor) = &monitor {
            monitor.cancel();
        }
        monitor
    }
}

/// Keeps one instance registered with one registry backend.
///
/// All methods take `&self`; wrap the lifecycle in an `Arc` to share it.
/// Dropping it stops the heartbeat without unregistering.
pub struct RegistrationLifecycle {
    shared: Arc<Shared>,
}

impl RegistrationLifecycle {
    pub fn new(
        backend: Arc<dyn RegistrationBackend>,
        rotator: Arc<EndpointRotator>,
        settings: LifecycleSettings,
    ) -> Self {
        Self::with_observer(backend, rotator, settings, Arc::new(()))
    }

    pub fn with_observer(
        backend: Arc<dyn RegistrationBackend>,
        rotator: Arc<EndpointRotator>,
        settings: LifecycleSettings,
        observer: Arc<dyn HeartbeatObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                rotator,
                settings,
                observer,
                slot: Mutex::new(Slot {
                    phase: Phase::Unregistered,
                    monitor: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> RegistrationState {
        match self.shared.slot.lock().phase {
            Phase::Unregistered => RegistrationState::Unregistered,
            Phase::Registering => RegistrationState::Registering,
            Phase::AwaitingConfirmation => RegistrationState::AwaitingConfirmation,
            Phase::Registered(_) => RegistrationState::Registered,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    /// The instance as last registered, if registered.
    pub fn current(&self) -> Option<ServiceInstance> {
        self.shared.registered()
    }

    pub fn rotator(&self) -> &Arc<EndpointRotator> {
        &self.shared.rotator
    }

    /// Register `candidate` and start heartbeating.
    ///
    /// Fails with [`RegistryError::IllegalState`] while another registration
    /// is live or in progress.
    pub async fn register(&self, candidate: ServiceInstance) -> Result<ServiceInstance> {
        let (registered, previous) = self.shared.register_instance(candidate, None).await?;
        if let Some(previous) = previous {
            // a monitor left over from a registration that lost its lease
            previous.stop().await;
        }
        Ok(registered)
    }

    pub async fn update_status(&self, status: InstanceStatus) -> Result<ServiceInstance> {
        let current = self.shared.registered().ok_or_else(|| {
            RegistryError::IllegalState("cannot update status before registering".to_string())
        })?;
        let updated = current.with_status(status);

        let backend = &self.shared.backend;
        let pending = &updated;
        self.shared
            .settings
            .update_status
            .run(Operation::UpdateStatus, &self.shared.rotator, move |endpoint| async move {
                backend.update_status(&endpoint, pending).await
            })
            .await?;

        let mut slot = self.shared.slot.lock();
        if let Phase::Registered(instance) = &mut slot.phase {
            if instance.instance_id() == updated.instance_id() {
                *instance = updated.clone();
            }
        }
        drop(slot);

        info!(
            instance_id = %updated.instance_id(),
            "Updated status to {}", status
        );
        Ok(updated)
    }

    /// Stop heartbeating and remove the registration.
    ///
    /// The heartbeat monitor is always stopped, and no heartbeat fires once
    /// this returns. If the registry cannot be told, the error is returned
    /// and the instance stays recorded as registered.
    pub async fn unregister(&self) -> Result<()> {
        if let Some(monitor) = self.shared.take_monitor() {
            monitor.stop().await;
        }

        let registered = self.shared.registered().ok_or_else(|| {
            RegistryError::IllegalState("cannot unregister before registering".to_string())
        })?;

        let backend = &self.shared.backend;
        let pending = &registered;
        self.shared
            .settings
            .unregister
            .run(Operation::Unregister, &self.shared.rotator, move |endpoint| async move {
                backend.unregister(&endpoint, pending).await
            })
            .await?;

        self.shared.mark_unregistered(registered.instance_id());
        // a self-heal that raced with us may have installed a new monitor
        if let Some(monitor) = self.shared.take_monitor() {
            monitor.stop().await;
        }

        info!(
            instance_id = %registered.instance_id(),
            "Unregistered {}",
            registered.service_name()
        );
        Ok(())
    }
}

impl Drop for RegistrationLifecycle {
    fn drop(&mut self) {
        if let Some(monitor) = self.shared.slot.lock().monitor.take() {
            monitor.cancel();
        }
    }
}

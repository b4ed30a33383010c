//! In-process doubles for lifecycle and heartbeat tests.

use crate::backend::RegistrationBackend;
use crate::error::RemoteError;
use crate::heartbeat::{HeartbeatObserver, SelfHealOutcome};
use crate::instance::ServiceInstance;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

type Outcome = Result<(), RemoteError>;

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub op: &'static str,
    pub endpoint: String,
    pub instance_id: String,
}

/// Backend whose answers are scripted per operation. Once a script runs out
/// every call succeeds; `find` echoes the instance it was asked about, with a
/// native record naming the endpoint that answered.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    scripts: Mutex<HashMap<&'static str, VecDeque<Outcome>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn script(&self, op: &'static str, outcomes: impl IntoIterator<Item = Outcome>) {
        self.scripts
            .lock()
            .entry(op)
            .or_default()
            .extend(outcomes);
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.op == op).count()
    }

    pub fn endpoints(&self, op: &str) -> Vec<String> {
        self.select(op, |call| call.endpoint.clone())
    }

    pub fn instance_ids(&self, op: &str) -> Vec<String> {
        self.select(op, |call| call.instance_id.clone())
    }

    fn select(&self, op: &str, field: impl Fn(&Call) -> String) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op == op)
            .map(field)
            .collect()
    }

    fn answer(&self, op: &'static str, endpoint: &str, instance: &ServiceInstance) -> Outcome {
        self.calls.lock().push(Call {
            op,
            endpoint: endpoint.to_string(),
            instance_id: instance.instance_id().to_string(),
        });
        self.scripts
            .lock()
            .get_mut(op)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl RegistrationBackend for ScriptedBackend {
    async fn register(&self, endpoint: &str, instance: &ServiceInstance) -> Result<String, RemoteError> {
        self.answer("register", endpoint, instance)?;
        Ok(instance.instance_id().to_string())
    }

    async fn find(&self, endpoint: &str, instance: &ServiceInstance) -> Result<ServiceInstance, RemoteError> {
        self.answer("find", endpoint, instance)?;
        Ok(instance
            .clone()
            .with_native(serde_json::json!({ "seen_by": endpoint })))
    }

    async fn heartbeat(&self, endpoint: &str, instance: &ServiceInstance) -> Result<(), RemoteError> {
        self.answer("heartbeat", endpoint, instance)
    }

    async fn update_status(&self, endpoint: &str, instance: &ServiceInstance) -> Result<(), RemoteError> {
        self.answer("update_status", endpoint, instance)
    }

    async fn unregister(&self, endpoint: &str, instance: &ServiceInstance) -> Result<(), RemoteError> {
        self.answer("unregister", endpoint, instance)
    }
}

#[derive(Default)]
pub(crate) struct Recorder {
    beats: Mutex<usize>,
    outcomes: Mutex<Vec<SelfHealOutcome>>,
}

impl Recorder {
    pub fn beats(&self) -> usize {
        *self.beats.lock()
    }

    pub fn outcomes(&self) -> Vec<SelfHealOutcome> {
        self.outcomes.lock().clone()
    }
}

impl HeartbeatObserver for Recorder {
    fn heartbeat_sent(&self, _instance: &ServiceInstance) {
        *self.beats.lock() += 1;
    }

    fn self_healing(&self, _instance: &ServiceInstance, outcome: SelfHealOutcome) {
        self.outcomes.lock().push(outcome);
    }
}

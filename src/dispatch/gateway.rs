use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CircuitBreaker, DispatchError, FailureKind, TaskRouter, recover};
use crate::{authz::PolicyError, config::DispatchConfig, observability::metrics};

/// A unit of background work addressed by dotted task name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskMessage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
        }
    }
}

/// Submits tasks to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    type Error: FailureKind + std::error::Error + Send + Sync + 'static;

    async fn submit(&self, queue: &str, task: &TaskMessage) -> Result<(), Self::Error>;
}

/// Routes tasks to queues and submits them through a circuit breaker.
///
/// The gateway never retries. A failed submission is reported once and the
/// caller decides what to do with it.
pub struct DispatchGateway<B> {
    broker: B,
    router: TaskRouter,
    breaker: CircuitBreaker,
}

impl<B: Broker> DispatchGateway<B> {
    pub fn new(broker: B, router: TaskRouter, breaker: CircuitBreaker) -> Self {
        Self {
            broker,
            router,
            breaker,
        }
    }

    pub fn from_config(broker: B, config: &DispatchConfig) -> Result<Self, PolicyError> {
        Ok(Self::new(
            broker,
            TaskRouter::from_config(config)?,
            CircuitBreaker::new("broker", &config.circuit_breaker),
        ))
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Submit `task` to its routed queue. Returns the queue name.
    pub async fn dispatch(&self, task: &TaskMessage) -> Result<&str, DispatchError<B::Error>> {
        let queue = self.router.queue_for(&task.name);
        let (result, _) = self.submit(queue, task, &[]).await;
        result.map(|_| queue)
    }

    /// Like [`dispatch`](Self::dispatch), but an open circuit or a tracked
    /// broker failure drops the task with a warning and returns `false`.
    pub async fn dispatch_or_drop(&self, task: &TaskMessage) -> Result<bool, DispatchError<B::Error>> {
        let mut kinds = vec!["circuit_open"];
        kinds.extend(
            self.breaker
                .config()
                .tracked_errors
                .iter()
                .map(String::as_str),
        );

        let queue = self.router.queue_for(&task.name);
        let (result, _) = self.submit(queue, task, &kinds).await;
        result
    }

    /// Submit through the breaker and record one outcome per task. Failures
    /// whose kind is in `drop_kinds` become `Ok(false)`.
    async fn submit(
        &self,
        queue: &str,
        task: &TaskMessage,
        drop_kinds: &[&str],
    ) -> (Result<bool, DispatchError<B::Error>>, &'static str) {
        let result = self
            .breaker
            .call_async(|| self.broker.submit(queue, task))
            .await;

        let outcome = match &result {
            Ok(()) => "submitted",
            Err(e) if drop_kinds.contains(&e.failure_kind()) => "dropped",
            Err(e) if e.is_circuit_open() => "rejected",
            Err(_) => "failed",
        };
        metrics::record_task_dispatch(queue, outcome);

        match outcome {
            "submitted" => debug!(task_id = %task.id, task = %task.name, queue, "Task dispatched"),
            "dropped" => warn!(task_id = %task.id, task = %task.name, queue, "Task dropped"),
            _ => {}
        }
        (recover(result.map(|()| true), drop_kinds, || false), outcome)
    }
}

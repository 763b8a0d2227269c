//! Execution routing: dispatches synthesized queries one at a time until every
//! descriptor has been executed exactly once.
//!
//! ```text
//!   Pending ──(remaining descriptor)──▶ Dispatching(d) ──(record appended)──┐
//!      ▲                                                                   │
//!      └───────────────────────────────────────────────────────────────────┘
//!   Pending ──(nothing remaining)──▶ Done
//! ```
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geoloc_core::{
    ExecutionRecord, GeolocError, PipelineOptions, PipelineState, QueryDescriptor, QueryExecutor,
    Stage, StageError,
};

const STAGE_ID: &str = "execute.spatial.v1";

/// Outcome of the routing predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Continue,
    Done,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::Continue => "continue",
            RouteDecision::Done => "done",
        }
    }
}

/// `Continue` while some descriptor key has no record yet.
pub fn route_condition(state: &PipelineState) -> RouteDecision {
    let executed = state.executed_keys();
    if state.descriptors.iter().all(|d| executed.contains(d.key())) {
        RouteDecision::Done
    } else {
        RouteDecision::Continue
    }
}

/// First descriptor, in synthesis order, that has not been dispatched.
pub fn next_descriptor(state: &PipelineState) -> Option<QueryDescriptor> {
    state.remaining_descriptors().into_iter().next().cloned()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouterState {
    Pending,
    Dispatching(QueryDescriptor),
    Done,
}

pub struct ExecutionRouter {
    executor: Arc<dyn QueryExecutor>,
    dispatch_timeout: Option<Duration>,
}

impl ExecutionRouter {
    pub fn new(executor: Arc<dyn QueryExecutor>, options: &PipelineOptions) -> Self {
        Self {
            executor,
            dispatch_timeout: options.dispatch_timeout,
        }
    }

    /// Runs one descriptor. Never fails: executor errors and timeouts come
    /// back as a failed record.
    pub async fn dispatch(&self, descriptor: QueryDescriptor) -> ExecutionRecord {
        let call = self.executor.execute(descriptor.key());
        let result = match self.dispatch_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(GeolocError::collaborator(
                    self.executor.name(),
                    format!("timed out after {}ms", limit.as_millis()),
                )),
            },
            None => call.await,
        };

        match result {
            Ok(rows) => ExecutionRecord::from_rows(descriptor, rows),
            Err(err) => ExecutionRecord::failed(descriptor, err.to_string()),
        }
    }

    /// Drives the state machine to `Done`, appending one record per
    /// descriptor.
    pub async fn run_to_completion(&self, mut state: PipelineState) -> PipelineState {
        let mut phase = RouterState::Pending;

        loop {
            phase = match phase {
                RouterState::Pending => match route_condition(&state) {
                    RouteDecision::Done => RouterState::Done,
                    RouteDecision::Continue => match next_descriptor(&state) {
                        Some(descriptor) => RouterState::Dispatching(descriptor),
                        None => RouterState::Done,
                    },
                },
                RouterState::Dispatching(descriptor) => {
                    tracing::debug!(
                        trace_id = %state.trace_id,
                        a = %descriptor.object_a.label,
                        b = %descriptor.object_b.label,
                        "dispatching query"
                    );
                    let record = self.dispatch(descriptor).await;
                    match &record.error {
                        Some(message) => {
                            tracing::warn!(
                                trace_id = %state.trace_id,
                                executor = %self.executor.name(),
                                error = %message,
                                "query failed"
                            );
                            state.record_failure(STAGE_ID, self.executor.name(), message.clone());
                        }
                        None => tracing::debug!(rows = record.rows.len(), "query returned"),
                    }
                    state.records.push(record);
                    RouterState::Pending
                }
                RouterState::Done => break,
            };
        }

        tracing::info!(
            trace_id = %state.trace_id,
            dispatched = state.records.len(),
            failed = state.records.iter().filter(|r| r.error.is_some()).count(),
            "execution routing done"
        );
        state
    }
}

pub struct ExecuteStage {
    router: ExecutionRouter,
}

impl ExecuteStage {
    pub fn new(executor: Arc<dyn QueryExecutor>, options: &PipelineOptions) -> Self {
        Self {
            router: ExecutionRouter::new(executor, options),
        }
    }
}

#[async_trait]
impl Stage for ExecuteStage {
    fn id(&self) -> &'static str {
        STAGE_ID
    }

    fn deterministic(&self) -> bool {
        false
    }

    async fn run(&self, state: PipelineState) -> Result<PipelineState, StageError> {
        Ok(self.router.run_to_completion(state).await)
    }
}

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{
    collaborators::{Collaborators, ToolCall},
    config::PipelineConfig,
    error::StageError,
    stages::hooks::{ArgumentSanitizer, Sanitized},
    state::{SessionState, StateKey},
};

#[derive(Debug)]
pub enum StageOutcome {
    Success {
        output: String,
    },
    /// A usable but reduced-fidelity result. `reasons` is never empty.
    Degraded {
        output: String,
        reasons: Vec<String>,
    },
    Failed(StageError),
}

impl StageOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        StageOutcome::Success {
            output: output.into(),
        }
    }

    pub fn degraded(output: impl Into<String>, reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            return Self::success(output);
        }
        StageOutcome::Degraded {
            output: output.into(),
            reasons,
        }
    }

    pub fn failed(error: impl Into<StageError>) -> Self {
        StageOutcome::Failed(error.into())
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            StageOutcome::Success { output } | StageOutcome::Degraded { output, .. } => {
                Some(output)
            }
            StageOutcome::Failed(_) => None,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            StageOutcome::Success { .. } => OutcomeKind::Success,
            StageOutcome::Degraded { .. } => OutcomeKind::Degraded,
            StageOutcome::Failed(_) => OutcomeKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Degraded,
    Failed,
}

/// What one stage sees while it runs.
pub struct StageContext<'a> {
    pub stage_id: &'static str,
    pub state: &'a mut SessionState,
    pub config: &'a PipelineConfig,
    pub collaborators: &'a Collaborators,
    pub(crate) sanitizers: &'a [Arc<dyn ArgumentSanitizer>],
}

impl<'a> StageContext<'a> {
    /// Passes a sub-call through the sanitizer registered for its tool, if any.
    pub fn sanitize(&self, call: ToolCall) -> ToolCall {
        let Some(sanitizer) = self.sanitizers.iter().find(|s| s.tool() == call.name) else {
            return call;
        };
        match sanitizer.sanitize(call) {
            Sanitized::Unchanged(call) => call,
            Sanitized::Rewritten { call, reason } => {
                tracing::info!(stage = self.stage_id, tool = %call.name, %reason, "sanitized sub-call arguments");
                call
            }
        }
    }

    /// Awaits a collaborator call, turning silence past `call_timeout` into an error.
    pub async fn bounded<F: Future + Send>(
        &self,
        collaborator: &'static str,
        call: F,
    ) -> Result<F::Output, StageError> {
        let timeout = self.config.call_timeout;
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            tracing::warn!(stage = self.stage_id, collaborator, ?timeout, "collaborator timed out");
            StageError::Timeout {
                collaborator,
                timeout,
            }
        })
    }

    /// Typed read of a required key.
    pub fn require<T: DeserializeOwned>(&self, key: StateKey) -> Result<T, StageError> {
        self.state
            .get_as(&key)
            .ok_or(StageError::MissingKey(key))
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> &'static str;

    /// Keys that must be present before `run`.
    fn requires(&self) -> Vec<StateKey>;

    fn produces(&self) -> Vec<StateKey>;

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome;
}

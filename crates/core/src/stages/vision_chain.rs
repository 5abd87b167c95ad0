use tracing::{info, warn};

use crate::{
    collaborators::{VisionError, VisionReply, VisionRequest},
    stages::stage::StageContext,
};

/// Result of walking the configured model chain for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Reply {
        model: String,
        reply: VisionReply,
        /// Set when a model after the primary answered.
        fallback: bool,
    },
    /// The model answered but not in the requested shape; goes to repair.
    Invalid { model: String, raw: String },
    /// Every attempt on every model failed.
    Exhausted { errors: Vec<String> },
}

impl ChainOutcome {
    /// Reason to record when the answer came from a lower-tier model.
    pub fn fallback_reason(&self) -> Option<String> {
        match self {
            ChainOutcome::Reply {
                model,
                fallback: true,
                ..
            } => Some(format!("primary vision model unavailable, used fallback {model}")),
            _ => None,
        }
    }
}

/// Tries each model of the chain in order, `attempts_per_model` times each.
///
/// `ModelUnavailable` and timeouts move on to the next attempt. An
/// `InvalidResponse` stops the walk: the model is up, its output needs repair.
pub async fn call_vision_chain(ctx: &StageContext<'_>, request: &VisionRequest) -> ChainOutcome {
    let chain = &ctx.config.vision_chain;
    let vision = ctx.collaborators.vision.clone();
    let mut errors = Vec::new();

    for (position, model) in chain.models.iter().enumerate() {
        for attempt in 1..=chain.attempts_per_model {
            let result = ctx
                .bounded("vision", vision.analyze(model, request))
                .await;
            match result {
                Ok(Ok(reply)) => {
                    info!(stage = ctx.stage_id, model = %model, attempt, "vision call answered");
                    return ChainOutcome::Reply {
                        model: model.clone(),
                        reply,
                        fallback: position > 0,
                    };
                }
                Ok(Err(VisionError::InvalidResponse { model, raw })) => {
                    warn!(stage = ctx.stage_id, model = %model, "vision response invalid");
                    return ChainOutcome::Invalid { model, raw };
                }
                Ok(Err(e @ VisionError::ModelUnavailable { .. })) => {
                    warn!(stage = ctx.stage_id, model = %model, attempt, error = %e, "vision model unavailable");
                    errors.push(e.to_string());
                }
                Err(timeout) => {
                    warn!(stage = ctx.stage_id, model = %model, attempt, error = %timeout, "vision call timed out");
                    errors.push(format!("model {model}: {timeout}"));
                }
            }
        }
    }

    ChainOutcome::Exhausted { errors }
}

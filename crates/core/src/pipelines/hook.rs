//! Hook analysis: score the opening window, then repair and format the judgment.
//!
//! Only the formatting stage's output reaches the caller; the scorer's raw
//! judgment stays in session state.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    collaborators::{ToolCall, ToolResult, VisionReply, VisionRequest},
    config::PipelineConfig,
    error::StageError,
    format::format_hook_markdown,
    pipelines::breakdown::VISION_UNAVAILABLE,
    repair::repair_hook_score,
    scoring::HookAnalysis,
    stages::{
        ChainOutcome, EmptyArguments, FieldType, FilteredSequence, HookSegmentsPrimer,
        HookedStage, ObjectSchema, Stage, StageContext, StageOutcome, call_vision_chain,
    },
    state::{Fidelity, StateKey},
    types::HookSegmentsContext,
};

pub const PIPELINE: &str = "hook_analysis";

pub const ANALYZE_HOOK_SEGMENTS: &str = "analyze_hook_segments";
pub const WEB_SEARCH: &str = "web_search";

static HOOK_PROMPT: &str = r#"
  You are a short-video hook analyst. The hook is the opening few seconds
  that decide whether a viewer keeps watching.

  INPUT: frames from the opening scenes, and a JSON context describing each
  opening scene (time range, shot type, camera movement, visuals, speech).

  TASK: score the hook from 0 to 10 on five dimensions and explain each score.

  OUTPUT: Return ONLY valid JSON:
  {
    "visual_impact": {"score": 0-10, "rationale": "..."},
    "language_hook": {"score": 0-10, "rationale": "..."},
    "emotional_arousal": {"score": 0-10, "rationale": "..."},
    "information_density": {"score": 0-10, "rationale": "..."},
    "rhythm_control": {"score": 0-10, "rationale": "..."},
    "overall_score": 0-10,
    "hook_type": "question | conflict | curiosity | benefit | shock | story",
    "strengths": ["..."],
    "weaknesses": ["..."],
    "suggestions": ["..."],
    "retention_prediction": "..."
  }

  RULES:
  - The scene context is already attached; call analyze_hook_segments only
    if it is missing
  - Never invent a score for a dimension you cannot judge
"#;

pub fn hook_pipeline(config: &PipelineConfig) -> FilteredSequence {
    FilteredSequence::new(
        PIPELINE,
        vec![
            HookedStage::new(HookScoreStage {
                max_tool_rounds: config.max_tool_rounds,
            })
            .with_primer(HookSegmentsPrimer::from_config(config))
            .with_sanitizer(EmptyArguments::new(ANALYZE_HOOK_SEGMENTS))
            .with_sanitizer(ObjectSchema::new(WEB_SEARCH).field("query", FieldType::String)),
            HookedStage::new(HookFormatStage),
        ],
    )
}

/// Asks the vision chain for a judgment of the opening window.
pub struct HookScoreStage {
    max_tool_rounds: usize,
}

impl HookScoreStage {
    pub const ID: &'static str = "hook.score";

    async fn execute_tool(ctx: &StageContext<'_>, call: &ToolCall) -> ToolResult {
        let content = match call.name.as_str() {
            ANALYZE_HOOK_SEGMENTS => ctx
                .state
                .get(&StateKey::HookSegmentsContext)
                .cloned()
                .unwrap_or_else(|| json!({"error": "hook segments are not available"})),
            WEB_SEARCH => match (&ctx.collaborators.search, call.arguments["query"].as_str()) {
                (None, _) => json!({"error": "web search is not configured"}),
                (Some(_), None) => json!({"error": "query is required"}),
                (Some(search), Some(query)) => {
                    match ctx.bounded("web_search", search.search(query)).await {
                        Ok(Ok(hits)) => json!({"hits": hits}),
                        Ok(Err(e)) => json!({"error": e.to_string()}),
                        Err(e) => json!({"error": e.to_string()}),
                    }
                }
            },
            other => json!({"error": format!("unknown tool {other}")}),
        };
        ToolResult {
            name: call.name.clone(),
            content,
        }
    }
}

#[async_trait]
impl Stage for HookScoreStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        vec![StateKey::HookSegmentsContext]
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::HookAnalysis]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let context: HookSegmentsContext = match ctx.require(StateKey::HookSegmentsContext) {
            Ok(context) => context,
            Err(e) => return StageOutcome::Failed(e),
        };
        debug!(
            stage = Self::ID,
            segments = context.segment_count,
            frames = context.frame_count,
            "scoring hook window"
        );

        let mut request = VisionRequest::new(HOOK_PROMPT, context.frames())
            .with_context(json!({ "hook_segments": context }))
            .with_tool(ANALYZE_HOOK_SEGMENTS)
            .with_tool(WEB_SEARCH);
        let mut reasons: Vec<String> = Vec::new();

        for round in 0..=self.max_tool_rounds {
            let outcome = call_vision_chain(ctx, &request).await;
            if let Some(reason) = outcome.fallback_reason() {
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }

            let raw = match outcome {
                ChainOutcome::Reply {
                    reply: VisionReply::ToolCall(call),
                    ..
                } => {
                    if round == self.max_tool_rounds {
                        return StageOutcome::Failed(StageError::InvalidInput {
                            reason: format!(
                                "model still calling {} after {} tool rounds",
                                call.name, self.max_tool_rounds
                            ),
                        });
                    }
                    let call = ctx.sanitize(call);
                    let result = Self::execute_tool(ctx, &call).await;
                    request.tool_results.push(result);
                    continue;
                }
                ChainOutcome::Reply {
                    reply: VisionReply::Structured(value),
                    ..
                } => value,
                ChainOutcome::Reply {
                    reply: VisionReply::FreeText(text),
                    ..
                } => Value::String(text),
                ChainOutcome::Invalid { raw, .. } => Value::String(raw),
                ChainOutcome::Exhausted { .. } => {
                    reasons.push(VISION_UNAVAILABLE.to_string());
                    return StageOutcome::degraded("hook not scored", reasons);
                }
            };

            let output = match &raw {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            ctx.state
                .set(StateKey::HookAnalysis, raw, Fidelity::Raw, Self::ID);
            return StageOutcome::degraded(output, reasons);
        }

        StageOutcome::Failed(StageError::InvalidInput {
            reason: "no judgment produced".to_string(),
        })
    }
}

/// Terminal stage: repairs the raw judgment into a complete record.
pub struct HookFormatStage;

impl HookFormatStage {
    pub const ID: &'static str = "hook.format";
}

#[async_trait]
impl Stage for HookFormatStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        vec![StateKey::HookAnalysis]
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::HookAnalysis, StateKey::HookAnalysisMarkdown]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let Some(entry) = ctx.state.entry(&StateKey::HookAnalysis).cloned() else {
            return StageOutcome::Failed(StageError::MissingKey(StateKey::HookAnalysis));
        };

        let analysis: HookAnalysis = if entry.fidelity >= Fidelity::Repaired {
            match serde_json::from_value(entry.value) {
                Ok(analysis) => analysis,
                Err(e) => return StageOutcome::failed(e),
            }
        } else {
            match repair_hook_score(&entry.value) {
                Ok(repaired) => {
                    info!(
                        stage = Self::ID,
                        fidelity = ?repaired.fidelity,
                        transforms = ?repaired.transforms,
                        "hook score formatted"
                    );
                    if let Err(e) = ctx.state.set_serialized(
                        StateKey::HookAnalysis,
                        &repaired.analysis,
                        repaired.fidelity,
                        Self::ID,
                    ) {
                        return StageOutcome::failed(e);
                    }
                    repaired.analysis
                }
                Err(e) => return StageOutcome::failed(e),
            }
        };

        let markdown = format_hook_markdown(&analysis);
        ctx.state.set(
            StateKey::HookAnalysisMarkdown,
            Value::String(markdown.clone()),
            Fidelity::Validated,
            Self::ID,
        );
        StageOutcome::success(markdown)
    }
}

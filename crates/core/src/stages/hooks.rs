//! Per-stage hooks.
//!
//! Priming hooks run before a stage's primary call and write derived context
//! into session state. Argument sanitizers sit between a stage deciding to make
//! a sub-call and that sub-call executing; they are attached per tool name.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    collaborators::{Collaborators, ToolCall},
    config::PipelineConfig,
    error::{HookError, StageError},
    stages::stage::{Stage, StageContext, StageOutcome},
    state::{Fidelity, SessionState, StateKey},
    types::{BreakdownResult, HookSegment, HookSegmentsContext},
};

#[derive(Debug, Clone, PartialEq)]
pub enum PrimeOutcome {
    Written,
    /// Derived value already present and identical.
    Unchanged,
    /// Source key absent; nothing derived.
    Skipped { missing: StateKey },
}

pub trait PrimingHook: Send + Sync {
    fn id(&self) -> &'static str;

    /// Must be idempotent: the same state yields the same derived value.
    fn prime(&self, state: &mut SessionState) -> Result<PrimeOutcome, HookError>;
}

/// Derives `hook_segments_context` from the leading scenes of `breakdown_result`.
pub struct HookSegmentsPrimer {
    window_secs: f64,
    frames_per_segment: usize,
}

impl HookSegmentsPrimer {
    pub const ID: &'static str = "hook_segments_primer";

    pub fn new(window_secs: f64, frames_per_segment: usize) -> Self {
        Self {
            window_secs,
            frames_per_segment,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.hook_window_secs, config.frames_per_scene)
    }

    pub fn derive(&self, breakdown: &BreakdownResult) -> HookSegmentsContext {
        let mut segments = Vec::new();
        for (index, scene) in breakdown.segments.iter().enumerate() {
            segments.push(HookSegment {
                index,
                start: scene.start,
                end: scene.end,
                shot_type: scene.shot_type,
                camera_movement: scene.camera_movement,
                visual_description: scene.visual_description.clone(),
                audio_description: scene.audio_description.clone(),
                frame_refs: scene
                    .frame_refs
                    .iter()
                    .take(self.frames_per_segment)
                    .cloned()
                    .collect(),
            });
            if scene.end >= self.window_secs {
                break;
            }
        }

        let total_duration = segments.last().map(|s| s.end).unwrap_or(0.0);
        let frame_count = segments.iter().map(|s| s.frame_refs.len()).sum();
        HookSegmentsContext {
            window_secs: self.window_secs,
            segment_count: segments.len(),
            total_duration,
            frame_count,
            segments,
        }
    }
}

impl PrimingHook for HookSegmentsPrimer {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn prime(&self, state: &mut SessionState) -> Result<PrimeOutcome, HookError> {
        let Some(breakdown) = state.get_as::<BreakdownResult>(&StateKey::BreakdownResult) else {
            return Ok(PrimeOutcome::Skipped {
                missing: StateKey::BreakdownResult,
            });
        };

        let derived = serde_json::to_value(self.derive(&breakdown)).map_err(|source| {
            HookError::Serialize {
                hook: Self::ID,
                source,
            }
        })?;

        if state.get(&StateKey::HookSegmentsContext) == Some(&derived) {
            return Ok(PrimeOutcome::Unchanged);
        }
        state.set(
            StateKey::HookSegmentsContext,
            derived,
            Fidelity::Validated,
            Self::ID,
        );
        Ok(PrimeOutcome::Written)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sanitized {
    Unchanged(ToolCall),
    Rewritten { call: ToolCall, reason: String },
}

impl Sanitized {
    pub fn into_call(self) -> ToolCall {
        match self {
            Sanitized::Unchanged(call) | Sanitized::Rewritten { call, .. } => call,
        }
    }
}

pub trait ArgumentSanitizer: Send + Sync {
    /// Tool name this sanitizer guards.
    fn tool(&self) -> &str;

    /// Identity on well-formed calls; corrective only on schema violations.
    fn sanitize(&self, call: ToolCall) -> Sanitized;
}

/// Contract for a tool that takes no arguments.
pub struct EmptyArguments {
    tool: String,
}

impl EmptyArguments {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl ArgumentSanitizer for EmptyArguments {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn sanitize(&self, call: ToolCall) -> Sanitized {
        if matches!(&call.arguments, Value::Object(map) if map.is_empty()) {
            return Sanitized::Unchanged(call);
        }
        let reason = format!("expected no arguments, got {}", call.arguments);
        Sanitized::Rewritten {
            call: ToolCall {
                name: call.name,
                arguments: Value::Object(Map::new()),
            },
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
}

impl FieldType {
    fn admits(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// Flat object schema: known fields keep their value when correctly typed.
pub struct ObjectSchema {
    tool: String,
    fields: Vec<(String, FieldType)>,
}

impl ObjectSchema {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| *ty)
    }
}

impl ArgumentSanitizer for ObjectSchema {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn sanitize(&self, call: ToolCall) -> Sanitized {
        let mut fixes = Vec::new();

        let object = match &call.arguments {
            Value::Object(map) => map.clone(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => {
                    fixes.push("decoded stringified arguments".to_string());
                    map
                }
                _ => {
                    fixes.push("arguments string is not a JSON object".to_string());
                    Map::new()
                }
            },
            Value::Null => {
                fixes.push("null arguments".to_string());
                Map::new()
            }
            other => {
                fixes.push(format!("arguments must be an object, got {other}"));
                Map::new()
            }
        };

        let mut kept = Map::new();
        for (key, value) in object {
            match self.field_type(&key) {
                Some(ty) if ty.admits(&value) => {
                    kept.insert(key, value);
                }
                Some(ty) => fixes.push(format!("dropped {key}: expected {ty:?}")),
                None => fixes.push(format!("dropped unknown field {key}")),
            }
        }

        if fixes.is_empty() {
            return Sanitized::Unchanged(call);
        }
        Sanitized::Rewritten {
            call: ToolCall {
                name: call.name,
                arguments: Value::Object(kept),
            },
            reason: fixes.join("; "),
        }
    }
}

/// A stage with its hooks attached.
pub struct HookedStage {
    stage: Arc<dyn Stage>,
    primers: Vec<Arc<dyn PrimingHook>>,
    sanitizers: Vec<Arc<dyn ArgumentSanitizer>>,
}

impl HookedStage {
    pub fn new(stage: impl Stage + 'static) -> Self {
        Self {
            stage: Arc::new(stage),
            primers: Vec::new(),
            sanitizers: Vec::new(),
        }
    }

    pub fn with_primer(mut self, primer: impl PrimingHook + 'static) -> Self {
        self.primers.push(Arc::new(primer));
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: impl ArgumentSanitizer + 'static) -> Self {
        self.sanitizers.push(Arc::new(sanitizer));
        self
    }

    pub fn id(&self) -> &'static str {
        self.stage.id()
    }

    pub fn requires(&self) -> Vec<StateKey> {
        self.stage.requires()
    }

    pub fn produces(&self) -> Vec<StateKey> {
        self.stage.produces()
    }

    /// Primes, checks prerequisites, then runs the stage.
    pub async fn run(
        &self,
        state: &mut SessionState,
        config: &PipelineConfig,
        collaborators: &Collaborators,
    ) -> StageOutcome {
        let mut unprimed: Option<StateKey> = None;
        for primer in &self.primers {
            match primer.prime(state) {
                Ok(PrimeOutcome::Skipped { missing }) => {
                    debug!(stage = self.id(), primer = primer.id(), %missing, "priming skipped");
                    unprimed.get_or_insert(missing);
                }
                Ok(outcome) => {
                    debug!(stage = self.id(), primer = primer.id(), ?outcome, "primed")
                }
                Err(e) => return StageOutcome::failed(e),
            }
        }

        if let Some(missing) = self.requires().into_iter().find(|k| !state.has(k)) {
            // report the upstream key a skipped primer was waiting for
            return StageOutcome::Failed(StageError::MissingKey(unprimed.unwrap_or(missing)));
        }

        let mut ctx = StageContext {
            stage_id: self.id(),
            state,
            config,
            collaborators,
            sanitizers: &self.sanitizers,
        };
        self.stage.run(&mut ctx).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{CameraMovement, MediaDelivery, MediaRef, SceneSegment, ShotType};

    fn scene(start: f64, end: f64, frames: usize) -> SceneSegment {
        SceneSegment {
            start,
            end,
            shot_type: ShotType::CloseUp,
            camera_movement: CameraMovement::Static,
            visual_description: Some(format!("scene at {start}")),
            audio_description: None,
            tag: "talking head".into(),
            frame_refs: (0..frames)
                .map(|i| MediaRef::url(format!("https://frames/{start}-{i}.jpg")))
                .collect(),
        }
    }

    fn breakdown(segments: Vec<SceneSegment>) -> BreakdownResult {
        BreakdownResult {
            duration: segments.last().map(|s| s.end).unwrap_or(0.0),
            segments,
            bgm: None,
            transcript_available: false,
            media_delivery: MediaDelivery::Remote,
        }
    }

    #[test]
    fn primer_takes_leading_segments_until_window_is_covered() {
        let primer = HookSegmentsPrimer::new(3.0, 3);
        let ctx = primer.derive(&breakdown(vec![
            scene(0.0, 1.5, 5),
            scene(1.5, 3.2, 1),
            scene(3.2, 8.0, 2),
        ]));

        assert_eq!(ctx.segment_count, 2);
        assert_eq!(ctx.total_duration, 3.2);
        assert_eq!(ctx.frame_count, 4);
        assert_eq!(ctx.segments[0].frame_refs.len(), 3);
    }

    #[test]
    fn primer_keeps_one_segment_when_the_first_is_long() {
        let primer = HookSegmentsPrimer::new(3.0, 3);
        let ctx = primer.derive(&breakdown(vec![scene(0.0, 10.0, 1), scene(10.0, 12.0, 1)]));
        assert_eq!(ctx.segment_count, 1);
    }

    #[test]
    fn primer_is_idempotent() {
        let mut state = SessionState::new();
        state
            .set_serialized(
                StateKey::BreakdownResult,
                &breakdown(vec![scene(0.0, 2.0, 2), scene(2.0, 4.0, 2)]),
                Fidelity::Validated,
                "test",
            )
            .unwrap();
        let primer = HookSegmentsPrimer::new(3.0, 3);

        assert_eq!(primer.prime(&mut state).unwrap(), PrimeOutcome::Written);
        let first = serde_json::to_string(state.get(&StateKey::HookSegmentsContext).unwrap()).unwrap();
        assert_eq!(primer.prime(&mut state).unwrap(), PrimeOutcome::Unchanged);
        let second = serde_json::to_string(state.get(&StateKey::HookSegmentsContext).unwrap()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn primer_skips_without_breakdown() {
        let mut state = SessionState::new();
        let outcome = HookSegmentsPrimer::new(3.0, 3).prime(&mut state).unwrap();
        assert_eq!(
            outcome,
            PrimeOutcome::Skipped {
                missing: StateKey::BreakdownResult
            }
        );
        assert!(!state.has(&StateKey::HookSegmentsContext));
    }

    #[test]
    fn empty_arguments_is_identity_on_well_formed_call() {
        let call = ToolCall {
            name: "analyze_hook_segments".into(),
            arguments: json!({}),
        };
        let sanitized = EmptyArguments::new("analyze_hook_segments").sanitize(call.clone());
        assert_eq!(sanitized, Sanitized::Unchanged(call));
    }

    #[test]
    fn empty_arguments_rewrites_extraneous_payload() {
        let sanitizer = EmptyArguments::new("analyze_hook_segments");
        for bad in [
            json!({"segments": [1, 2]}),
            json!("{}"),
            json!(null),
            json!([]),
        ] {
            let call = ToolCall {
                name: "analyze_hook_segments".into(),
                arguments: bad,
            };
            let rewritten = sanitizer.sanitize(call).into_call();
            assert_eq!(rewritten.arguments, json!({}));
            assert_eq!(rewritten.name, "analyze_hook_segments");
        }
    }

    #[test]
    fn object_schema_keeps_well_formed_call() {
        let schema = ObjectSchema::new("web_search").field("query", FieldType::String);
        let call = ToolCall {
            name: "web_search".into(),
            arguments: json!({"query": "hook trends"}),
        };
        assert_eq!(schema.sanitize(call.clone()), Sanitized::Unchanged(call));
    }

    #[test]
    fn object_schema_decodes_strings_and_drops_bad_fields() {
        let schema = ObjectSchema::new("web_search")
            .field("query", FieldType::String)
            .field("limit", FieldType::Integer);
        let call = ToolCall {
            name: "web_search".into(),
            arguments: json!(r#"{"query": "hooks", "limit": "five", "extra": true}"#),
        };

        match schema.sanitize(call) {
            Sanitized::Rewritten { call, reason } => {
                assert_eq!(call.arguments, json!({"query": "hooks"}));
                assert!(reason.contains("decoded stringified arguments"));
                assert!(reason.contains("extra"));
            }
            other => panic!("expected rewrite, got {other:?}"),
        }
    }
}

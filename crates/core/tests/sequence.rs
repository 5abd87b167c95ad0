mod common;

use async_trait::async_trait;
use serde_json::json;
use shotlist_core::{
    CancelHandle, SessionState, StateKey, cancel_pair,
    events::{BusConfig, EventBus, downcast_ref, expect},
    stages::{
        FilteredSequence, HookedStage, OutcomeKind, OutputFilter, SequenceEnv, SequenceStatus,
        Stage, StageContext, StageOutcome,
        events::{EndKind, SequenceEnded, StageFailed},
    },
    state::Fidelity,
};
use uuid::Uuid;

use common::{Fakes, test_config};

/// Writes its products and answers with a fixed text.
struct Emit {
    id: &'static str,
    text: &'static str,
    requires: Vec<StateKey>,
    produces: Vec<StateKey>,
    degraded: Option<&'static str>,
}

impl Emit {
    fn new(id: &'static str, text: &'static str) -> Self {
        Self {
            id,
            text,
            requires: Vec::new(),
            produces: Vec::new(),
            degraded: None,
        }
    }

    fn requiring(mut self, key: StateKey) -> Self {
        self.requires.push(key);
        self
    }

    fn producing(mut self, key: StateKey) -> Self {
        self.produces.push(key);
        self
    }

    fn degraded(mut self, reason: &'static str) -> Self {
        self.degraded = Some(reason);
        self
    }
}

#[async_trait]
impl Stage for Emit {
    fn id(&self) -> &'static str {
        self.id
    }

    fn requires(&self) -> Vec<StateKey> {
        self.requires.clone()
    }

    fn produces(&self) -> Vec<StateKey> {
        self.produces.clone()
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        for key in &self.produces {
            ctx.state
                .set(key.clone(), json!(self.text), Fidelity::Validated, self.id);
        }
        match self.degraded {
            Some(reason) => StageOutcome::degraded(self.text, vec![reason.to_string()]),
            None => StageOutcome::success(self.text),
        }
    }
}

/// Commits its product, then cancels the job it runs in.
struct CancelAfter {
    handle: CancelHandle,
}

#[async_trait]
impl Stage for CancelAfter {
    fn id(&self) -> &'static str {
        "scenes"
    }

    fn requires(&self) -> Vec<StateKey> {
        Vec::new()
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::VisionScenes]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        ctx.state.set(
            StateKey::VisionScenes,
            json!([]),
            Fidelity::Validated,
            "scenes",
        );
        self.handle.cancel();
        StageOutcome::success("scenes drafted")
    }
}

fn external_texts(bus: &EventBus) -> Vec<String> {
    bus.external_transcript()
        .iter()
        .filter_map(|e| e.event.display_text().map(str::to_string))
        .collect()
}

fn new_bus() -> EventBus {
    EventBus::new(BusConfig {
        session_id: Uuid::new_v4(),
    })
}

#[tokio::test]
async fn only_the_terminal_stage_output_reaches_the_caller() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (_handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "two_step",
        vec![
            HookedStage::new(Emit::new("draft", "INTERNAL_ONLY")),
            HookedStage::new(Emit::new("final", "final answer")),
        ],
    );
    let report = sequence.run(&mut state, &env).await;

    assert!(report.is_completed());
    assert_eq!(report.terminal_output.as_deref(), Some("final answer"));

    let external = external_texts(&bus);
    assert_eq!(external, vec!["final answer".to_string()]);
    assert!(!external.iter().any(|t| t.contains("INTERNAL_ONLY")));

    assert_eq!(
        state.get(&StateKey::stage_output("draft")),
        Some(&json!("INTERNAL_ONLY"))
    );
    assert!(
        bus.internal_transcript()
            .iter()
            .any(|e| e.event.display_text() == Some("INTERNAL_ONLY"))
    );
    assert_eq!(
        bus.metrics()
            .suppressed_total
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn the_filter_can_name_another_stage() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (_handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "draft_visible",
        vec![
            HookedStage::new(Emit::new("draft", "visible draft")),
            HookedStage::new(Emit::new("final", "bookkeeping")),
        ],
    )
    .with_filter(OutputFilter::terminal("draft"));
    let report = sequence.run(&mut state, &env).await;

    assert_eq!(external_texts(&bus), vec!["visible draft".to_string()]);
    assert_eq!(report.terminal_output.as_deref(), Some("visible draft"));
    assert!(state.has(&StateKey::stage_output("final")));
}

#[tokio::test]
async fn degradation_notices_cross_the_filter() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (_handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "two_step",
        vec![
            HookedStage::new(Emit::new("draft", "partial draft").degraded("cache cold")),
            HookedStage::new(Emit::new("final", "final answer")),
        ],
    );
    let report = sequence.run(&mut state, &env).await;

    assert!(report.is_completed());
    assert_eq!(report.stages[0].kind, OutcomeKind::Degraded);

    let external = external_texts(&bus);
    assert_eq!(external.len(), 2);
    assert!(external[0].contains("cache cold"));
    assert!(!external.iter().any(|t| t.contains("partial draft")));

    let notes = state.notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].stage, "draft");
    assert_eq!(notes[0].reason, "cache cold");
}

#[tokio::test]
async fn aborts_when_no_remaining_stage_can_run() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (_handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "needs_breakdown",
        vec![
            HookedStage::new(
                Emit::new("prime", "primed")
                    .requiring(StateKey::BreakdownResult)
                    .producing(StateKey::HookSegmentsContext),
            ),
            HookedStage::new(Emit::new("judge", "judged").requiring(StateKey::BreakdownResult)),
        ],
    );
    let report = sequence.run(&mut state, &env).await;

    assert_eq!(
        report.status,
        SequenceStatus::Aborted {
            stage: "prime".to_string(),
            missing: StateKey::BreakdownResult,
        }
    );
    assert_eq!(report.stages.len(), 1);
    assert_eq!(report.missing, vec![StateKey::HookSegmentsContext]);
    assert!(report.terminal_output.is_none());

    let external = bus.external_transcript();
    let failed = expect::<StageFailed>(&external[0].event, StageFailed::EVENT_TYPE).unwrap();
    assert_eq!(failed.stage, "prime");
    assert_eq!(failed.missing, vec!["hook_segments_context".to_string()]);
    let ended = downcast_ref::<SequenceEnded>(&external[1].event).unwrap();
    assert_eq!(ended.kind, EndKind::Aborted);
    assert!(ended.message.contains("breakdown_result"));
    assert!(!external_texts(&bus).iter().any(|t| t == "judged"));
}

#[tokio::test]
async fn aborts_when_later_stages_need_what_the_failed_stage_would_produce() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (_handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "score_then_format",
        vec![
            HookedStage::new(
                Emit::new("score", "scored")
                    .requiring(StateKey::HookSegmentsContext)
                    .producing(StateKey::HookAnalysis),
            ),
            HookedStage::new(
                Emit::new("format", "formatted")
                    .requiring(StateKey::HookAnalysis)
                    .producing(StateKey::HookAnalysisMarkdown),
            ),
        ],
    );
    let report = sequence.run(&mut state, &env).await;

    assert_eq!(
        report.status,
        SequenceStatus::Aborted {
            stage: "score".to_string(),
            missing: StateKey::HookSegmentsContext,
        }
    );
    assert_eq!(report.stages.len(), 1);
}

#[tokio::test]
async fn a_failed_stage_does_not_stop_independent_stages() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (_handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "mixed",
        vec![
            HookedStage::new(
                Emit::new("optional", "never")
                    .requiring(StateKey::BgmProfile)
                    .producing(StateKey::SearchResults),
            ),
            HookedStage::new(Emit::new("final", "final answer")),
        ],
    );
    let report = sequence.run(&mut state, &env).await;

    assert!(report.is_completed());
    assert_eq!(report.stages[0].kind, OutcomeKind::Failed);
    assert_eq!(report.missing, vec![StateKey::SearchResults]);
    assert_eq!(report.terminal_output.as_deref(), Some("final answer"));

    let external = external_texts(&bus);
    assert_eq!(external.len(), 2);
    assert!(external[0].contains("bgm_profile"));
    assert_eq!(external[1], "final answer");
}

#[tokio::test]
async fn cancellation_stops_at_the_next_stage_boundary() {
    let config = test_config();
    let collaborators = Fakes::new().collaborators();
    let bus = new_bus();
    let (handle, cancel) = cancel_pair();
    let env = SequenceEnv {
        config: &config,
        collaborators: &collaborators,
        bus: &bus,
        cancel: &cancel,
    };
    let mut state = SessionState::new();

    let sequence = FilteredSequence::new(
        "cancellable",
        vec![
            HookedStage::new(CancelAfter {
                handle: handle.clone(),
            }),
            HookedStage::new(Emit::new("final", "final answer").producing(StateKey::BreakdownResult)),
        ],
    );
    let report = sequence.run(&mut state, &env).await;

    assert_eq!(
        report.status,
        SequenceStatus::Cancelled {
            next_stage: "final".to_string()
        }
    );
    assert!(state.has(&StateKey::VisionScenes));
    assert!(!state.has(&StateKey::BreakdownResult));
    assert!(external_texts(&bus).iter().any(|t| t.contains("cancelled")));

    handle.reset();
    assert!(!cancel.is_cancelled());
}

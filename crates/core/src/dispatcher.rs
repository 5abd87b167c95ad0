//! Root dispatcher: classify a request, plan sub-pipelines, run them on the job.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    cancel::{CancelHandle, CancelToken, cancel_pair},
    collaborators::Collaborators,
    config::PipelineConfig,
    error::DispatchError,
    events::{BusConfig, EventBus},
    pipelines::{breakdown_pipeline, hook_pipeline, report_pipeline, search_pipeline},
    stages::{FilteredSequence, SequenceEnv, SequenceReport, SequenceStatus},
    state::{Fidelity, SessionState, StateKey},
    types::{DegradedNote, MediaSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Breakdown,
    HookAnalysis,
    Search,
    Report,
}

impl Intent {
    /// Execution order; prerequisites come first.
    pub const ORDER: [Intent; 4] = [
        Intent::Breakdown,
        Intent::HookAnalysis,
        Intent::Search,
        Intent::Report,
    ];

    pub fn prerequisites(&self) -> &'static [Intent] {
        match self {
            Intent::Breakdown | Intent::Search => &[],
            Intent::HookAnalysis | Intent::Report => &[Intent::Breakdown],
        }
    }

    /// Key whose presence lets a later turn skip this pipeline.
    fn reusable_key(&self) -> Option<StateKey> {
        match self {
            Intent::Breakdown => Some(StateKey::BreakdownResult),
            Intent::HookAnalysis => Some(StateKey::HookAnalysis),
            // search depends on the query and the report on everything else
            Intent::Search | Intent::Report => None,
        }
    }

    fn needs_media(&self) -> bool {
        !matches!(self, Intent::Search)
    }

    /// Keys this pipeline writes; cleared before every run so a new run never
    /// competes with leftovers from an earlier turn.
    fn working_keys(&self) -> Vec<StateKey> {
        match self {
            Intent::Breakdown => vec![
                StateKey::PreprocessResult,
                StateKey::VisionScenes,
                StateKey::BgmProfile,
                StateKey::BreakdownResult,
            ],
            Intent::HookAnalysis => vec![
                StateKey::HookSegmentsContext,
                StateKey::HookAnalysis,
                StateKey::HookAnalysisMarkdown,
            ],
            Intent::Search => vec![StateKey::SearchResults],
            Intent::Report => vec![StateKey::FinalReport],
        }
    }

    /// Keys invalidated when this pipeline is recomputed on request.
    fn invalidates(&self) -> Vec<StateKey> {
        match self {
            Intent::Breakdown => [Intent::Breakdown, Intent::HookAnalysis]
                .iter()
                .flat_map(Intent::working_keys)
                .collect(),
            other => other.working_keys(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Intent::Breakdown => "breakdown",
            Intent::HookAnalysis => "hook_analysis",
            Intent::Search => "search",
            Intent::Report => "report",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub text: String,
    pub media: Option<MediaSource>,
    /// Explicit intents win over keyword classification.
    pub intents: Vec<Intent>,
    /// Recompute even when products already exist.
    pub force: bool,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_media(mut self, media: MediaSource) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_intents(mut self, intents: impl IntoIterator<Item = Intent>) -> Self {
        self.intents = intents.into_iter().collect();
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

const FULL_ANALYSIS: &[&str] = &[
    "full analysis",
    "complete analysis",
    "analyze everything",
    "全面分析",
    "完整分析",
    "全部分析",
];
const HOOK_WORDS: &[&str] = &["hook", "opening", "first 3 seconds", "钩子", "开头", "前三秒", "黄金3秒"];
const REPORT_WORDS: &[&str] = &["report", "summary", "summarize", "报告", "总结"];
const SEARCH_WORDS: &[&str] = &["search", "trend", "competitor", "搜索", "热点", "竞品"];
const BREAKDOWN_WORDS: &[&str] = &["breakdown", "break down", "scene", "shot", "分镜", "拆解", "镜头"];

/// Intents for a request, deduplicated, in execution order.
pub fn classify(request: &Request) -> Vec<Intent> {
    let mut intents = if !request.intents.is_empty() {
        request.intents.clone()
    } else {
        let text = request.text.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

        if mentions(FULL_ANALYSIS) {
            vec![Intent::Breakdown, Intent::HookAnalysis, Intent::Report]
        } else {
            let mut found = Vec::new();
            if mentions(BREAKDOWN_WORDS) {
                found.push(Intent::Breakdown);
            }
            if mentions(HOOK_WORDS) {
                found.push(Intent::HookAnalysis);
            }
            if mentions(SEARCH_WORDS) {
                found.push(Intent::Search);
            }
            if mentions(REPORT_WORDS) {
                found.push(Intent::Report);
            }
            if found.is_empty() {
                found.push(Intent::Breakdown);
            }
            found
        }
    };
    intents.sort();
    intents.dedup();
    intents
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Run,
    Reuse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub intent: Intent,
    pub action: StepAction,
    /// True when the step was added only as a prerequisite.
    pub implied: bool,
}

/// Expands prerequisites and marks steps whose products already exist.
pub fn plan(intents: &[Intent], state: &SessionState, force: bool) -> Vec<PlannedStep> {
    let mut wanted: Vec<(Intent, bool)> = Vec::new();
    for intent in intents {
        for pre in intent.prerequisites() {
            if !intents.contains(pre) && !wanted.iter().any(|(i, _)| i == pre) {
                wanted.push((*pre, true));
            }
        }
        if !wanted.iter().any(|(i, _)| i == intent) {
            wanted.push((*intent, false));
        }
    }

    Intent::ORDER
        .into_iter()
        .filter_map(|intent| wanted.iter().find(|(i, _)| *i == intent).copied())
        .map(|(intent, implied)| {
            let reusable = intent.reusable_key().is_some_and(|key| match key {
                StateKey::HookAnalysis => state
                    .fidelity(&key)
                    .is_some_and(|f| f >= Fidelity::Repaired),
                key => state.has(&key),
            });
            // a forced recompute applies to what was asked for, not to prerequisites
            let action = if reusable && !(force && !implied) {
                StepAction::Reuse
            } else {
                StepAction::Run
            };
            PlannedStep {
                intent,
                action,
                implied,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseStatus {
    Completed,
    /// At least one sub-pipeline aborted; `explanation` names the missing input.
    Partial { explanation: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub intents: Vec<Intent>,
    pub reused: Vec<Intent>,
    pub runs: Vec<SequenceReport>,
    /// Everything the output filters let through, in order.
    pub output: String,
    pub notes: Vec<DegradedNote>,
    pub status: ResponseStatus,
}

/// One interaction thread: owns its session state and event log.
pub struct Job {
    id: Uuid,
    state: SessionState,
    config: PipelineConfig,
    collaborators: Collaborators,
    bus: EventBus,
    cancel: CancelToken,
}

impl Job {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> (Self, CancelHandle) {
        let id = Uuid::new_v4();
        let (handle, cancel) = cancel_pair();
        let job = Self {
            id,
            state: SessionState::new(),
            config,
            collaborators,
            bus: EventBus::new(BusConfig { session_id: id }),
            cancel,
        };
        (job, handle)
    }

    /// Job whose forwarded events are also streamed live.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stores the request's media; a different source resets derived state.
    fn accept_media(&mut self, media: &MediaSource) -> Result<(), DispatchError> {
        let value = serde_json::to_value(media)
            .map_err(|e| DispatchError::InvalidMedia(e.to_string()))?;
        if self.state.get(&StateKey::SourceMedia) == Some(&value) {
            return Ok(());
        }
        if self.state.has(&StateKey::SourceMedia) {
            info!(job_id = %self.id, "new source media; clearing derived state");
            self.state.clear_derived();
        }
        self.state
            .set(StateKey::SourceMedia, value, Fidelity::Validated, "dispatcher");
        Ok(())
    }

    fn pipeline_for(&self, intent: Intent, request: &Request) -> FilteredSequence {
        match intent {
            Intent::Breakdown => breakdown_pipeline(&self.config),
            Intent::HookAnalysis => hook_pipeline(&self.config),
            Intent::Search => search_pipeline(request.text.clone()),
            Intent::Report => report_pipeline(),
        }
    }

    #[instrument(skip_all, fields(job_id = %self.id))]
    pub async fn handle(&mut self, request: Request) -> Result<Response, DispatchError> {
        if let Some(media) = &request.media {
            self.accept_media(media)?;
        }

        let intents = classify(&request);
        if intents.iter().any(Intent::needs_media) && !self.state.has(&StateKey::SourceMedia) {
            return Err(DispatchError::NoMedia);
        }
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let steps = plan(&intents, &self.state, request.force);
        info!(?intents, ?steps, "dispatching");

        let since = self.bus.next_seq();
        let mut reused = Vec::new();
        let mut runs = Vec::new();
        let mut status = ResponseStatus::Completed;

        for step in steps {
            if step.action == StepAction::Reuse {
                info!(intent = %step.intent, "reusing stored result");
                reused.push(step.intent);
                continue;
            }

            let stale = if request.force {
                step.intent.invalidates()
            } else {
                step.intent.working_keys()
            };
            for key in stale {
                if self.state.remove(&key).is_some() {
                    debug!(intent = %step.intent, %key, "cleared before run");
                }
            }

            let pipeline = self.pipeline_for(step.intent, &request);
            info!(intent = %step.intent, pipeline = pipeline.name(), "running pipeline");
            let env = SequenceEnv {
                config: &self.config,
                collaborators: &self.collaborators,
                bus: &self.bus,
                cancel: &self.cancel,
            };
            let report = pipeline.run(&mut self.state, &env).await;

            if let SequenceStatus::Aborted { stage, missing } = &report.status {
                warn!(intent = %step.intent, %stage, %missing, "pipeline aborted");
                let explanation = format!(
                    "{} could not finish: {missing} is missing and nothing left in the pipeline can produce it",
                    step.intent
                );
                status = match status {
                    ResponseStatus::Partial { explanation: prev } => ResponseStatus::Partial {
                        explanation: format!("{prev}; {explanation}"),
                    },
                    _ => ResponseStatus::Partial { explanation },
                };
            }
            let cancelled = matches!(report.status, SequenceStatus::Cancelled { .. });
            runs.push(report);
            if cancelled {
                status = ResponseStatus::Cancelled;
                break;
            }
        }

        let output = self
            .bus
            .external_since(since)
            .iter()
            .filter_map(|e| e.event.display_text().map(str::to_string))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(Response {
            intents,
            reused,
            runs,
            output,
            notes: self.state.notes(),
            status,
        })
    }

    /// Stored value for `key`, as committed by the last run.
    pub fn artifact(&self, key: &StateKey) -> Option<&Value> {
        self.state.get(key)
    }
}

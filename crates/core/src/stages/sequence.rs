use std::{sync::Arc, time::Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    cancel::CancelToken,
    collaborators::Collaborators,
    config::PipelineConfig,
    error::StageError,
    events::{Event, EventBus, Visibility},
    stages::{
        events::{SequenceEnded, StageCompleted, StageDegraded, StageFailed},
        hooks::HookedStage,
        stage::{OutcomeKind, StageOutcome},
    },
    state::{Fidelity, SessionState, StateKey},
    types::DegradedNote,
};

/// Boundary filter between a sub-pipeline and the caller.
///
/// Notices always pass. Stage output passes only when its author is the
/// terminal stage.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    terminal: &'static str,
}

impl OutputFilter {
    pub fn terminal(stage: &'static str) -> Self {
        Self { terminal: stage }
    }

    pub fn terminal_stage(&self) -> &'static str {
        self.terminal
    }

    pub fn admits(&self, event: &dyn Event) -> bool {
        match event.visibility() {
            Visibility::Notice => true,
            Visibility::StageOutput => event.author() == self.terminal,
        }
    }
}

/// What a sequence run needs besides the session state.
pub struct SequenceEnv<'a> {
    pub config: &'a PipelineConfig,
    pub collaborators: &'a Collaborators,
    pub bus: &'a EventBus,
    pub cancel: &'a CancelToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceStatus {
    Completed,
    Aborted { stage: String, missing: StateKey },
    Cancelled { next_stage: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: &'static str,
    pub kind: OutcomeKind,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub pipeline: &'static str,
    pub status: SequenceStatus,
    pub stages: Vec<StageRecord>,
    /// Artifacts a failed stage would have produced.
    pub missing: Vec<StateKey>,
    pub terminal_output: Option<String>,
}

impl SequenceReport {
    fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            status: SequenceStatus::Completed,
            stages: Vec::new(),
            missing: Vec::new(),
            terminal_output: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SequenceStatus::Completed
    }
}

/// Ordered stages over one session state, with output filtering at the boundary.
pub struct FilteredSequence {
    name: &'static str,
    stages: Vec<HookedStage>,
    filter: OutputFilter,
}

impl FilteredSequence {
    /// The last stage is the terminal one.
    pub fn new(name: &'static str, stages: Vec<HookedStage>) -> Self {
        let terminal = stages.last().map(HookedStage::id).unwrap_or(name);
        Self {
            name,
            stages,
            filter: OutputFilter::terminal(terminal),
        }
    }

    pub fn with_filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stage_ids(&self) -> Vec<&'static str> {
        self.stages.iter().map(HookedStage::id).collect()
    }

    fn emit(&self, bus: &EventBus, event: Arc<dyn Event>) -> Uuid {
        let event_id = event.event_id();
        let enriched = bus.publish(event);
        if self.filter.admits(enriched.event.as_ref()) {
            bus.forward(&enriched);
        } else {
            bus.suppress(&enriched);
        }
        event_id
    }

    /// Once `key` is missing, a later stage is blocked if it needs `key` or
    /// anything only a blocked stage would have produced. The sequence is
    /// stuck when every stage after `failed` is blocked.
    fn is_stuck(&self, failed: usize, key: &StateKey, state: &SessionState) -> bool {
        let mut blocked = vec![key.clone()];
        blocked.extend(
            self.stages[failed]
                .produces()
                .into_iter()
                .filter(|k| !state.has(k)),
        );

        self.stages[failed + 1..].iter().all(|stage| {
            let needs_blocked = stage
                .requires()
                .iter()
                .any(|k| blocked.contains(k) && !state.has(k));
            if needs_blocked {
                blocked.extend(stage.produces().into_iter().filter(|k| !state.has(k)));
            }
            needs_blocked
        })
    }

    pub async fn run(&self, state: &mut SessionState, env: &SequenceEnv<'_>) -> SequenceReport {
        let mut report = SequenceReport::new(self.name);
        let started = Instant::now();
        let mut parent: Option<Uuid> = None;

        info!(
            pipeline = self.name,
            stages = ?self.stage_ids(),
            terminal = self.filter.terminal_stage(),
            "sequence started"
        );

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_id = stage.id();

            if env.cancel.is_cancelled() {
                warn!(pipeline = self.name, next_stage = stage_id, "sequence cancelled");
                self.emit(
                    env.bus,
                    Arc::new(SequenceEnded::cancelled(parent, self.name, stage_id)),
                );
                report.status = SequenceStatus::Cancelled {
                    next_stage: stage_id.to_string(),
                };
                return report;
            }

            debug!(pipeline = self.name, stage = stage_id, index, "running stage");
            let stage_started = Instant::now();
            let outcome = stage.run(state, env.config, env.collaborators).await;
            let kind = outcome.kind();

            match outcome {
                StageOutcome::Success { output } => {
                    parent = Some(self.record_output(
                        state,
                        env.bus,
                        parent,
                        stage_id,
                        output,
                        &mut report,
                    ));
                    report.stages.push(StageRecord {
                        stage: stage_id,
                        kind,
                        detail: None,
                    });
                }
                StageOutcome::Degraded { output, reasons } => {
                    parent = Some(self.record_output(
                        state,
                        env.bus,
                        parent,
                        stage_id,
                        output,
                        &mut report,
                    ));
                    for reason in &reasons {
                        warn!(pipeline = self.name, stage = stage_id, %reason, "stage degraded");
                        state.append_note(DegradedNote {
                            stage: stage_id.to_string(),
                            reason: reason.clone(),
                        });
                        self.emit(
                            env.bus,
                            Arc::new(StageDegraded::new(parent, stage_id, reason.clone())),
                        );
                    }
                    report.stages.push(StageRecord {
                        stage: stage_id,
                        kind,
                        detail: Some(reasons.join("; ")),
                    });
                }
                StageOutcome::Failed(error) => {
                    let missing: Vec<StateKey> = stage
                        .produces()
                        .into_iter()
                        .filter(|k| !state.has(k))
                        .collect();
                    warn!(pipeline = self.name, stage = stage_id, error = %error, "stage failed");

                    parent = Some(self.emit(
                        env.bus,
                        Arc::new(StageFailed::new(
                            parent,
                            stage_id,
                            error.to_string(),
                            missing.iter().map(StateKey::name).collect(),
                        )),
                    ));
                    report.stages.push(StageRecord {
                        stage: stage_id,
                        kind,
                        detail: Some(error.to_string()),
                    });
                    for key in missing {
                        if !report.missing.contains(&key) {
                            report.missing.push(key);
                        }
                    }

                    if let StageError::MissingKey(key) = &error {
                        if self.is_stuck(index, key, state) {
                            warn!(
                                pipeline = self.name,
                                stage = stage_id,
                                missing = %key,
                                "sequence aborted"
                            );
                            self.emit(
                                env.bus,
                                Arc::new(SequenceEnded::aborted(
                                    parent,
                                    self.name,
                                    stage_id,
                                    &key.name(),
                                )),
                            );
                            report.status = SequenceStatus::Aborted {
                                stage: stage_id.to_string(),
                                missing: key.clone(),
                            };
                            return report;
                        }
                    }
                }
            }

            debug!(
                pipeline = self.name,
                stage = stage_id,
                outcome = ?kind,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "stage finished"
            );
        }

        info!(
            pipeline = self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sequence completed"
        );
        report
    }

    fn record_output(
        &self,
        state: &mut SessionState,
        bus: &EventBus,
        parent: Option<Uuid>,
        stage_id: &'static str,
        output: String,
        report: &mut SequenceReport,
    ) -> Uuid {
        state.set(
            StateKey::stage_output(stage_id),
            Value::String(output.clone()),
            Fidelity::Raw,
            stage_id,
        );
        if stage_id == self.filter.terminal_stage() {
            report.terminal_output = Some(output.clone());
        }
        self.emit(
            bus,
            Arc::new(StageCompleted::new(parent, self.name, stage_id, output)),
        )
    }
}

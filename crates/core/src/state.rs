//! Per-job session state.
//!
//! One [`SessionState`] belongs to exactly one job. Stages read and write it
//! through `get`/`set`/`has`; there is no ambient global state and no locking,
//! the owning job hands out `&mut` access to one stage at a time.

use std::{collections::BTreeMap, fmt};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::DegradedNote;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKey {
    SourceMedia,
    PreprocessResult,
    VisionScenes,
    BgmProfile,
    BreakdownResult,
    HookSegmentsContext,
    HookAnalysis,
    HookAnalysisMarkdown,
    SearchResults,
    DegradationNotes,
    FinalReport,
    StageOutput(String),
}

impl StateKey {
    pub fn stage_output(stage_id: &str) -> Self {
        StateKey::StageOutput(stage_id.to_string())
    }

    pub fn name(&self) -> String {
        match self {
            StateKey::SourceMedia => "source_media".into(),
            StateKey::PreprocessResult => "preprocess_result".into(),
            StateKey::VisionScenes => "vision_scenes".into(),
            StateKey::BgmProfile => "bgm_profile".into(),
            StateKey::BreakdownResult => "breakdown_result".into(),
            StateKey::HookSegmentsContext => "hook_segments_context".into(),
            StateKey::HookAnalysis => "hook_analysis".into(),
            StateKey::HookAnalysisMarkdown => "hook_analysis_markdown".into(),
            StateKey::SearchResults => "search_results".into(),
            StateKey::DegradationNotes => "degradation_notes".into(),
            StateKey::FinalReport => "final_report".into(),
            StateKey::StageOutput(stage) => format!("stage_output:{stage}"),
        }
    }

    /// Keys that describe the analyzed media rather than the conversation.
    fn is_derived(&self) -> bool {
        !matches!(self, StateKey::SourceMedia)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// How much a written value has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fidelity {
    /// Straight from a collaborator, unchecked.
    Raw,
    /// Recovered by the repair pass.
    Repaired,
    /// Parsed and validated on the first try.
    Validated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub value: Value,
    pub fidelity: Fidelity,
    pub written_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Replaced,
    Rejected { existing: Fidelity },
}

#[derive(Debug, Default, Clone)]
pub struct SessionState {
    entries: BTreeMap<StateKey, StateEntry>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StateKey) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn entry(&self, key: &StateKey) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    pub fn fidelity(&self, key: &StateKey) -> Option<Fidelity> {
        self.entries.get(key).map(|e| e.fidelity)
    }

    /// Typed read. A value that no longer matches `T` reads as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &StateKey) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "state value does not match expected shape");
                None
            }
        }
    }

    pub fn has(&self, key: &StateKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Writes `value` unless the key already holds a higher-fidelity value.
    pub fn set(
        &mut self,
        key: StateKey,
        value: Value,
        fidelity: Fidelity,
        writer: &str,
    ) -> WriteOutcome {
        if let Some(existing) = self.entries.get(&key) {
            if existing.fidelity > fidelity {
                warn!(
                    key = %key,
                    writer,
                    existing = ?existing.fidelity,
                    attempted = ?fidelity,
                    "rejected lower-fidelity overwrite"
                );
                return WriteOutcome::Rejected {
                    existing: existing.fidelity,
                };
            }
        }

        debug!(key = %key, writer, fidelity = ?fidelity, "state write");
        let replaced = self
            .entries
            .insert(
                key,
                StateEntry {
                    value,
                    fidelity,
                    written_by: writer.to_string(),
                },
            )
            .is_some();

        if replaced {
            WriteOutcome::Replaced
        } else {
            WriteOutcome::Inserted
        }
    }

    pub fn set_serialized<T: Serialize>(
        &mut self,
        key: StateKey,
        value: &T,
        fidelity: Fidelity,
        writer: &str,
    ) -> Result<WriteOutcome, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(key, value, fidelity, writer))
    }

    pub fn notes(&self) -> Vec<DegradedNote> {
        self.get_as(&StateKey::DegradationNotes).unwrap_or_default()
    }

    /// Appends a degradation note; identical notes are kept once.
    pub fn append_note(&mut self, note: DegradedNote) {
        let mut notes = self.notes();
        if notes.contains(&note) {
            return;
        }
        notes.push(note);
        let value = Value::Array(
            notes
                .iter()
                .filter_map(|n| serde_json::to_value(n).ok())
                .collect(),
        );
        self.set(
            StateKey::DegradationNotes,
            value,
            Fidelity::Validated,
            "session",
        );
    }

    /// Explicit invalidation, used before a pipeline reruns.
    pub fn remove(&mut self, key: &StateKey) -> Option<StateEntry> {
        self.entries.remove(key)
    }

    /// Drops everything derived from the current media, keeping `source_media`.
    pub fn clear_derived(&mut self) {
        self.entries.retain(|k, _| !k.is_derived());
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lower_fidelity_write_is_rejected() {
        let mut state = SessionState::new();
        state.set(
            StateKey::HookAnalysis,
            json!({"a": 1}),
            Fidelity::Repaired,
            "hook.format",
        );

        let outcome = state.set(
            StateKey::HookAnalysis,
            json!("raw text"),
            Fidelity::Raw,
            "hook.score",
        );

        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                existing: Fidelity::Repaired
            }
        );
        assert_eq!(state.get(&StateKey::HookAnalysis), Some(&json!({"a": 1})));
    }

    #[test]
    fn equal_or_better_fidelity_replaces() {
        let mut state = SessionState::new();
        state.set(StateKey::HookAnalysis, json!("raw"), Fidelity::Raw, "a");
        assert_eq!(
            state.set(StateKey::HookAnalysis, json!("raw 2"), Fidelity::Raw, "a"),
            WriteOutcome::Replaced
        );
        assert_eq!(
            state.set(StateKey::HookAnalysis, json!({}), Fidelity::Validated, "b"),
            WriteOutcome::Replaced
        );
        assert_eq!(state.fidelity(&StateKey::HookAnalysis), Some(Fidelity::Validated));
    }

    #[test]
    fn missing_key_reads_as_absent() {
        let state = SessionState::new();
        assert!(!state.has(&StateKey::BreakdownResult));
        assert!(state.get_as::<Vec<String>>(&StateKey::BreakdownResult).is_none());
    }

    #[test]
    fn notes_are_deduplicated_and_reset_with_media() {
        let mut state = SessionState::new();
        let note = DegradedNote {
            stage: "breakdown.preprocess".into(),
            reason: "ASR not configured".into(),
        };
        state.append_note(note.clone());
        state.append_note(note.clone());
        assert_eq!(state.notes(), vec![note]);

        state.set(StateKey::SourceMedia, json!("a.mp4"), Fidelity::Validated, "d");
        state.clear_derived();
        assert!(state.notes().is_empty());
        assert!(state.has(&StateKey::SourceMedia));
    }
}

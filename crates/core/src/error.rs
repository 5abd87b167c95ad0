use std::time::Duration;

use thiserror::Error;

use crate::{
    collaborators::{AudioError, ExtractError, SearchError, UploadError},
    repair::RepairError,
    state::StateKey,
};

/// Why a stage produced no usable output.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("missing prerequisite {0}")]
    MissingKey(StateKey),

    #[error("{collaborator} did not respond within {timeout:?}")]
    Timeout {
        collaborator: &'static str,
        timeout: Duration,
    },

    #[error("frame extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("audio analysis failed: {0}")]
    Audio(#[from] AudioError),

    #[error("web search failed: {0}")]
    Search(#[from] SearchError),

    #[error("upload failed and inline delivery is impossible: {0}")]
    Delivery(UploadError),

    #[error("scene timeline rejected: {0}")]
    Timeline(#[from] TimelineError),

    #[error("hook score could not be repaired: {0}")]
    Repair(#[from] RepairError),

    #[error("priming failed: {0}")]
    Hook(#[from] HookError),

    #[error("invalid stage input: {reason}")]
    InvalidInput { reason: String },

    #[error("Unhandled io error. {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimelineError {
    #[error("timeline is empty")]
    Empty,

    #[error("media duration {0} is not positive")]
    InvalidDuration(f64),

    #[error("segment {index} has end {end} <= start {start}")]
    Reversed { index: usize, start: f64, end: f64 },

    #[error("timeline starts at {start} instead of 0")]
    LateStart { start: f64 },

    #[error("gap between segment {index} (ends {prev_end}) and the next (starts {start})")]
    Gap {
        index: usize,
        prev_end: f64,
        start: f64,
    },

    #[error("segment {index} (ends {prev_end}) overlaps the next (starts {start})")]
    Overlap {
        index: usize,
        prev_end: f64,
        start: f64,
    },

    #[error("timeline ends at {end} but the media lasts {duration}")]
    Span { end: f64, duration: f64 },
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook {hook} could not serialize derived context: {source}")]
    Serialize {
        hook: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no media to analyze: send a video URL or file path first")]
    NoMedia,

    #[error("job was cancelled")]
    Cancelled,

    #[error("media source could not be recorded: {0}")]
    InvalidMedia(String),
}

use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndKind {
    Aborted,
    Cancelled,
}

/// A sub-pipeline stopped before its terminal stage.
#[derive(Serialize)]
pub struct SequenceEnded {
    pub header: EventHeader,
    pub pipeline: &'static str,
    pub kind: EndKind,
    pub message: String,
}

impl SequenceEnded {
    pub const ABORTED: &'static str = "sequence.aborted";
    pub const CANCELLED: &'static str = "sequence.cancelled";

    pub fn aborted(
        parent_id: Option<Uuid>,
        pipeline: &'static str,
        stage: &str,
        missing: &str,
    ) -> Self {
        Self {
            header: EventHeader::new(parent_id),
            pipeline,
            kind: EndKind::Aborted,
            message: format!(
                "{pipeline} aborted at {stage}: required input {missing} is missing and no remaining stage can produce it"
            ),
        }
    }

    pub fn cancelled(parent_id: Option<Uuid>, pipeline: &'static str, next_stage: &str) -> Self {
        Self {
            header: EventHeader::new(parent_id),
            pipeline,
            kind: EndKind::Cancelled,
            message: format!("{pipeline} cancelled before {next_stage}"),
        }
    }
}

impl Event for SequenceEnded {
    fn event_id(&self) -> Uuid {
        self.header.event_id
    }

    fn parent_ids(&self) -> &[Uuid] {
        &self.header.parent_ids
    }

    fn event_type(&self) -> &'static str {
        match self.kind {
            EndKind::Aborted => Self::ABORTED,
            EndKind::Cancelled => Self::CANCELLED,
        }
    }

    fn timestamp(&self) -> SystemTime {
        self.header.timestamp
    }

    fn author(&self) -> &str {
        self.pipeline
    }

    fn visibility(&self) -> Visibility {
        Visibility::Notice
    }

    fn display_text(&self) -> Option<&str> {
        Some(&self.message)
    }

    fn as_any(&self) -> &dyn Any {
        self as &dyn Any
    }
}

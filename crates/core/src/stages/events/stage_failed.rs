use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader, Visibility};

#[derive(Serialize)]
pub struct StageFailed {
    pub header: EventHeader,
    pub stage: &'static str,
    pub error: String,
    /// Artifacts the stage would have written.
    pub missing: Vec<String>,
    pub message: String,
}

impl StageFailed {
    pub const EVENT_TYPE: &'static str = "stage.failed";

    pub fn new(
        parent_id: Option<Uuid>,
        stage: &'static str,
        error: String,
        missing: Vec<String>,
    ) -> Self {
        let message = if missing.is_empty() {
            format!("[{stage}] failed: {error}")
        } else {
            format!("[{stage}] failed: {error} (missing: {})", missing.join(", "))
        };
        Self {
            header: EventHeader::new(parent_id),
            stage,
            error,
            missing,
            message,
        }
    }
}

impl Event for StageFailed {
    fn event_id(&self) -> Uuid {
        self.header.event_id
    }

    fn parent_ids(&self) -> &[Uuid] {
        &self.header.parent_ids
    }

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn timestamp(&self) -> SystemTime {
        self.header.timestamp
    }

    fn author(&self) -> &str {
        self.stage
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

use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader};

/// Judgment text a stage produced. Only the terminal stage's crosses the filter.
#[derive(Serialize)]
pub struct StageCompleted {
    pub header: EventHeader,
    pub pipeline: &'static str,
    pub stage: &'static str,
    pub output: String,
}

impl StageCompleted {
    pub const EVENT_TYPE: &'static str = "stage.completed";

    pub fn new(
        parent_id: Option<Uuid>,
        pipeline: &'static str,
        stage: &'static str,
        output: String,
    ) -> Self {
        Self {
            header: EventHeader::new(parent_id),
            pipeline,
            stage,
            output,
        }
    }
}

impl Event for StageCompleted {
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

    fn display_text(&self) -> Option<&str> {
        Some(&self.output)
    }

    fn as_any(&self) -> &dyn Any {
        self as &dyn Any
    }
}

use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader, Visibility};

#[derive(Serialize)]
pub struct StageDegraded {
    pub header: EventHeader,
    pub stage: &'static str,
    pub reason: String,
    pub message: String,
}

impl StageDegraded {
    pub const EVENT_TYPE: &'static str = "stage.degraded";

    pub fn new(parent_id: Option<Uuid>, stage: &'static str, reason: String) -> Self {
        Self {
            header: EventHeader::new(parent_id),
            message: format!("[{stage}] degraded: {reason}"),
            stage,
            reason,
        }
    }
}

impl Event for StageDegraded {
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

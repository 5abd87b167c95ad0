use std::{any::Any, sync::Arc, time::SystemTime};

use erased_serde::Serialize as ErasedSerialize;
use tokio::time::Instant;
use uuid::Uuid;

/// Whether an event may cross the sub-pipeline boundary on its own merits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Judgment text of a stage; only the terminal stage's reaches the caller.
    StageOutput,
    /// Degradation, failure and abort notices; always forwarded.
    Notice,
}

pub trait Event: Send + Sync + ErasedSerialize + 'static {
    fn event_id(&self) -> Uuid;
    fn parent_ids(&self) -> &[Uuid];
    fn event_type(&self) -> &'static str;
    fn timestamp(&self) -> SystemTime;

    /// Id of the stage (or pipeline) that produced the event.
    fn author(&self) -> &str;

    fn visibility(&self) -> Visibility {
        Visibility::StageOutput
    }

    /// Text shown to the caller when the event is forwarded.
    fn display_text(&self) -> Option<&str> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

erased_serde::serialize_trait_object!(Event);

pub struct EnrichedEvent {
    pub event: Arc<dyn Event>,
    pub ingest_seq: u64,
    pub session_id: Uuid,
    pub ingested_at: Instant,
}

pub fn downcast_ref<T: 'static>(e: &Arc<dyn Event>) -> Option<&T> {
    e.as_any().downcast_ref::<T>()
}

pub fn expect<'a, T: 'static>(
    e: &'a Arc<dyn Event>,
    expected_event_type: &'static str,
) -> anyhow::Result<&'a T> {
    downcast_ref::<T>(e).ok_or_else(|| {
        anyhow::anyhow!(
            "expected event_type={}, got={}",
            expected_event_type,
            e.event_type()
        )
    })
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct EventHeader {
    pub event_id: Uuid,
    pub parent_ids: Vec<Uuid>,
    pub timestamp: SystemTime,
}

impl EventHeader {
    pub fn new(parent: Option<Uuid>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            parent_ids: parent.into_iter().collect(),
            timestamp: SystemTime::now(),
        }
    }
}

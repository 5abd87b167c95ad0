mod common;

use std::{
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde_json::json;
use shotlist_core::{
    CancelHandle, Intent, Job, Request, ResponseStatus, StateKey,
    collaborators::VisionReply,
    pipelines::breakdown::{ASR_NOT_CONFIGURED, VISION_TIMELINE_REJECTED, VISION_UNAVAILABLE},
    stages::OutcomeKind,
    state::Fidelity,
    types::{BreakdownResult, MediaDelivery, MediaRef, MediaSource},
};

use common::{
    FakeExtractor, FakeStore, FakeVision, Fakes, hook_json, is_hook_request, scenes_for,
    test_config, unavailable,
};

fn remote() -> MediaSource {
    MediaSource::parse("https://cdn.test/clip.mp4")
}

fn breakdown_request(media: MediaSource) -> Request {
    Request::new("break down the scenes").with_media(media)
}

#[tokio::test]
async fn breakdown_without_asr_leaves_audio_empty() {
    let fakes = Fakes::new();
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    let response = job.handle(breakdown_request(remote())).await.unwrap();

    assert_eq!(response.intents, vec![Intent::Breakdown]);
    assert_eq!(response.status, ResponseStatus::Completed);
    assert!(
        response.runs[0]
            .stages
            .iter()
            .all(|s| s.kind != OutcomeKind::Failed)
    );

    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert_eq!(breakdown.segments.len(), 3);
    assert!(!breakdown.transcript_available);
    assert!(breakdown.segments.iter().all(|s| s.audio_description.is_none()));
    assert_eq!(breakdown.segments[0].start, 0.0);
    assert_eq!(breakdown.segments[2].end, 6.0);

    assert!(response.notes.iter().any(|n| n.reason == ASR_NOT_CONFIGURED));
    assert!(response.output.contains("## Scene breakdown"));
    // the vision stage's draft summary is internal
    assert!(!response.output.contains("scenes drafted"));
}

#[tokio::test]
async fn transcript_lines_land_on_overlapping_scenes() {
    let mut fakes = Fakes::new();
    fakes.extractor = Arc::new(
        FakeExtractor::new(6.0, &[0.0, 2.0, 4.0])
            .with_transcript(&[(0.5, 1.5, "hello"), (2.5, 3.0, "world")]),
    );
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    job.handle(breakdown_request(remote())).await.unwrap();

    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert!(breakdown.transcript_available);
    let audio: Vec<Option<&str>> = breakdown
        .segments
        .iter()
        .map(|s| s.audio_description.as_deref())
        .collect();
    assert_eq!(audio, vec![Some("hello"), Some("world"), None]);
    assert_eq!(breakdown.bgm.unwrap().style, "lofi");
}

#[tokio::test]
async fn failed_upload_falls_back_to_inline_delivery() {
    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    file.write_all(b"not really a video").unwrap();

    let mut fakes = Fakes::new();
    let store = Arc::new(FakeStore::new(true));
    fakes.store = Some(store.clone());
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    let media = MediaSource::Local {
        path: file.path().to_path_buf(),
    };
    let response = job.handle(breakdown_request(media)).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Completed);
    assert_eq!(store.uploads(), 1);

    let seen = fakes.extractor.seen.lock().unwrap().clone();
    assert!(matches!(&seen[0], MediaRef::Inline { mime, .. } if mime == "video/mp4"));

    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert!(!breakdown.segments.is_empty());
    assert_eq!(breakdown.media_delivery, MediaDelivery::Inline);

    let report = job
        .handle(Request::new("now the report").with_intents([Intent::Report]))
        .await
        .unwrap();
    assert_eq!(report.reused, vec![Intent::Breakdown]);
    assert!(report.output.contains("storage fallback"));
    assert_eq!(fakes.extractor.calls(), 1);
}

#[tokio::test]
async fn uploaded_media_is_passed_by_url() {
    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    file.write_all(b"frames").unwrap();

    let mut fakes = Fakes::new();
    fakes.store = Some(Arc::new(FakeStore::new(false)));
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    let media = MediaSource::Local {
        path: file.path().to_path_buf(),
    };
    let response = job.handle(breakdown_request(media)).await.unwrap();

    let seen = fakes.extractor.seen.lock().unwrap().clone();
    assert!(matches!(&seen[0], MediaRef::Url { url } if url.starts_with("https://store.test/")));
    assert!(
        !response
            .notes
            .iter()
            .any(|n| n.reason.contains("storage fallback"))
    );
}

#[tokio::test]
async fn malformed_frame_order_is_rejected_when_vision_is_down() {
    let mut fakes = Fakes::new();
    fakes.extractor = Arc::new(FakeExtractor::new(6.0, &[0.0, 4.0, 2.0]));
    fakes.vision = Arc::new(FakeVision::new(|model, _| Err(unavailable(model))));
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    let response = job.handle(breakdown_request(remote())).await.unwrap();

    assert!(!job.state().has(&StateKey::BreakdownResult));
    assert!(job.state().has(&StateKey::VisionScenes));
    assert_eq!(fakes.vision.models_called(), vec!["primary", "secondary"]);
    assert!(response.notes.iter().any(|n| n.reason == VISION_UNAVAILABLE));
    assert!(response.output.contains("scene timeline rejected"));

    let run = &response.runs[0];
    assert_eq!(run.missing, vec![StateKey::BreakdownResult]);
    assert_eq!(run.stages.last().unwrap().kind, OutcomeKind::Failed);
}

#[tokio::test]
async fn frame_fallback_keeps_a_valid_timeline() {
    let mut fakes = Fakes::new();
    fakes.vision = Arc::new(FakeVision::new(|model, _| Err(unavailable(model))));
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    let response = job.handle(breakdown_request(remote())).await.unwrap();

    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert_eq!(breakdown.segments.len(), 3);
    assert!(breakdown.segments.iter().all(|s| s.visual_description.is_none()));
    assert!(response.notes.iter().any(|n| n.reason == VISION_UNAVAILABLE));
}

#[tokio::test]
async fn fallback_model_is_tried_after_the_primary_budget() {
    let mut fakes = Fakes::new();
    fakes.vision = Arc::new(FakeVision::new(|model, request| {
        if model == "primary" {
            Err(unavailable(model))
        } else {
            Ok(VisionReply::Structured(scenes_for(request)))
        }
    }));
    let mut config = test_config();
    config.vision_chain = config.vision_chain.with_attempts(2);
    let (mut job, _cancel) = Job::new(config, fakes.collaborators());

    let response = job.handle(breakdown_request(remote())).await.unwrap();

    assert_eq!(
        fakes.vision.models_called(),
        vec!["primary", "primary", "secondary"]
    );
    assert!(
        response
            .notes
            .iter()
            .any(|n| n.reason.contains("used fallback secondary"))
    );
    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert_eq!(
        breakdown.segments[1].visual_description.as_deref(),
        Some("scene 1")
    );
}

#[tokio::test]
async fn a_hung_extractor_times_out_and_aborts_the_breakdown() {
    let mut fakes = Fakes::new();
    fakes.extractor =
        Arc::new(FakeExtractor::new(6.0, &[0.0]).with_delay(Duration::from_millis(500)));
    let mut config = test_config();
    config.call_timeout = Duration::from_millis(50);
    let (mut job, _cancel) = Job::new(config, fakes.collaborators());

    let response = job.handle(breakdown_request(remote())).await.unwrap();

    match &response.status {
        ResponseStatus::Partial { explanation } => {
            assert!(explanation.contains("preprocess_result"))
        }
        other => panic!("expected partial response, got {other:?}"),
    }
    assert!(response.output.contains("did not respond"));
    assert!(fakes.vision.calls().is_empty());
}

#[tokio::test]
async fn short_model_timeline_falls_back_to_frame_scenes() {
    let mut fakes = Fakes::new();
    fakes.vision = Arc::new(FakeVision::new(|_, request| {
        if is_hook_request(request) {
            return Ok(VisionReply::Structured(hook_json()));
        }
        Ok(VisionReply::Structured(json!({
            "scenes": [
                {"start": 0.0, "end": 2.0, "shot_type": "close_up", "visual_description": "face"},
                {"start": 2.0, "end": 5.8, "shot_type": "wide", "visual_description": "street"}
            ]
        })))
    }));
    let (mut job, _cancel) = Job::new(test_config(), fakes.collaborators());

    let response = job
        .handle(Request::new("full analysis").with_media(remote()))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Completed);
    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert_eq!(breakdown.segments.len(), 3);
    assert_eq!(breakdown.segments[2].end, 6.0);
    assert!(breakdown.segments.iter().all(|s| s.visual_description.is_none()));
    assert_eq!(
        job.state().fidelity(&StateKey::VisionScenes),
        Some(Fidelity::Raw)
    );

    let vision_notes: Vec<_> = response
        .notes
        .iter()
        .filter(|n| n.stage == "breakdown.vision")
        .collect();
    assert_eq!(vision_notes.len(), 1);
    assert!(vision_notes[0].reason.starts_with(VISION_TIMELINE_REJECTED));
    assert!(vision_notes[0].reason.contains("5.8"));

    assert_eq!(
        job.state().fidelity(&StateKey::HookAnalysis),
        Some(Fidelity::Validated)
    );
    assert!(job.state().has(&StateKey::FinalReport));
}

#[tokio::test]
async fn a_rerun_replaces_scenes_left_by_an_interrupted_turn() {
    let slot: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
    let trigger = slot.clone();
    let vision_down = Arc::new(AtomicBool::new(false));
    let down = vision_down.clone();

    let mut fakes = Fakes::new();
    fakes.vision = Arc::new(FakeVision::new(move |model, request| {
        if down.load(Ordering::SeqCst) {
            return Err(unavailable(model));
        }
        if let Some(handle) = trigger.lock().unwrap().as_ref() {
            handle.cancel();
        }
        Ok(VisionReply::Structured(scenes_for(request)))
    }));
    let (mut job, cancel) = Job::new(test_config(), fakes.collaborators());
    *slot.lock().unwrap() = Some(cancel.clone());

    let first = job.handle(breakdown_request(remote())).await.unwrap();
    assert_eq!(first.status, ResponseStatus::Cancelled);
    assert_eq!(
        job.state().fidelity(&StateKey::VisionScenes),
        Some(Fidelity::Validated)
    );

    *slot.lock().unwrap() = None;
    cancel.reset();
    vision_down.store(true, Ordering::SeqCst);

    let second = job.handle(Request::new("break down the scenes")).await.unwrap();

    assert_eq!(second.status, ResponseStatus::Completed);
    assert_eq!(fakes.extractor.calls(), 2);
    assert_eq!(
        job.state().fidelity(&StateKey::VisionScenes),
        Some(Fidelity::Raw)
    );
    let breakdown: BreakdownResult = job.state().get_as(&StateKey::BreakdownResult).unwrap();
    assert!(breakdown.segments.iter().all(|s| s.visual_description.is_none()));
    assert!(second.notes.iter().any(|n| n.reason == VISION_UNAVAILABLE));
}

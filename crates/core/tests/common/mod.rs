#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use shotlist_core::{
    Collaborators, ModelChain, PipelineConfig,
    collaborators::{
        AsrError, AudioAnalyzer, AudioError, ExtractError, FrameExtractor, ObjectStore,
        SearchError, SpeechRecognizer, UploadError, VisionError, VisionReply, VisionRequest,
        VisionScorer, WebSearch,
    },
    pipelines::hook::ANALYZE_HOOK_SEGMENTS,
    types::{BgmProfile, Extraction, Frame, MediaRef, SearchHit, Segment, Transcript},
};

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        vision_chain: ModelChain::new(["primary", "secondary"]),
        call_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

pub struct FakeExtractor {
    pub duration: f64,
    pub timestamps: Vec<f64>,
    pub transcript: Option<Transcript>,
    pub delay: Option<Duration>,
    pub seen: Mutex<Vec<MediaRef>>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new(duration: f64, timestamps: &[f64]) -> Self {
        Self {
            duration,
            timestamps: timestamps.to_vec(),
            transcript: None,
            delay: None,
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_transcript(mut self, segments: &[(f64, f64, &str)]) -> Self {
        self.transcript = Some(Transcript {
            text: segments.iter().map(|s| s.2).collect::<Vec<_>>().join(" "),
            segments: segments
                .iter()
                .map(|(start, end, text)| Segment {
                    start: *start,
                    end: *end,
                    text: text.to_string(),
                })
                .collect(),
            language: "en".into(),
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn extract(&self, media: &MediaRef) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(media.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Extraction {
            duration: self.duration,
            frames: self
                .timestamps
                .iter()
                .map(|t| Frame {
                    timestamp: *t,
                    image: MediaRef::url(format!("frame://{t}")),
                })
                .collect(),
            transcript: self.transcript.clone(),
            audio: Some(MediaRef::url("audio://track")),
        })
    }
}

type Script = dyn Fn(&str, &VisionRequest) -> Result<VisionReply, VisionError> + Send + Sync;

pub struct FakeVision {
    script: Box<Script>,
    calls: Mutex<Vec<(String, VisionRequest)>>,
}

impl FakeVision {
    pub fn new(
        script: impl Fn(&str, &VisionRequest) -> Result<VisionReply, VisionError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn standard() -> Self {
        Self::new(standard_reply)
    }

    pub fn calls(&self) -> Vec<(String, VisionRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|(model, _)| model).collect()
    }
}

#[async_trait]
impl VisionScorer for FakeVision {
    async fn analyze(
        &self,
        model: &str,
        request: &VisionRequest,
    ) -> Result<VisionReply, VisionError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), request.clone()));
        (self.script)(model, request)
    }
}

pub fn is_hook_request(request: &VisionRequest) -> bool {
    request.tools.iter().any(|t| t == ANALYZE_HOOK_SEGMENTS)
}

pub fn unavailable(model: &str) -> VisionError {
    VisionError::ModelUnavailable {
        model: model.to_string(),
        reason: "503".into(),
    }
}

/// One scene per frame timestamp, shaped like a well-behaved model reply.
pub fn scenes_for(request: &VisionRequest) -> Value {
    let context = request.context.clone().unwrap_or(Value::Null);
    let duration = context["duration"].as_f64().unwrap_or(0.0);
    let stamps: Vec<f64> = context["frame_timestamps"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();

    let scenes: Vec<Value> = stamps
        .iter()
        .enumerate()
        .map(|(i, t)| {
            json!({
                "start": if i == 0 { 0.0 } else { *t },
                "end": stamps.get(i + 1).copied().unwrap_or(duration),
                "shot_type": "medium",
                "camera_movement": "static",
                "visual_description": format!("scene {i}"),
                "tag": "demo",
            })
        })
        .collect();
    json!({ "scenes": scenes })
}

pub fn hook_json() -> Value {
    json!({
        "visual_impact": {"score": 8, "rationale": "bright first frame"},
        "language_hook": {"score": 6, "rationale": "direct address"},
        "emotional_arousal": {"score": 5, "rationale": "calm"},
        "information_density": {"score": 7, "rationale": "two claims"},
        "rhythm_control": {"score": 9, "rationale": "quick cuts"},
        "hook_type": "curiosity",
        "strengths": ["strong visual"],
        "weaknesses": [],
        "suggestions": ["state the benefit earlier"],
        "retention_prediction": "above average"
    })
}

pub fn standard_reply(_model: &str, request: &VisionRequest) -> Result<VisionReply, VisionError> {
    if is_hook_request(request) {
        Ok(VisionReply::Structured(hook_json()))
    } else {
        Ok(VisionReply::Structured(scenes_for(request)))
    }
}

pub struct FakeAudio {
    pub fail: bool,
}

#[async_trait]
impl AudioAnalyzer for FakeAudio {
    async fn analyze(&self, _audio: &MediaRef) -> Result<BgmProfile, AudioError> {
        if self.fail {
            return Err(AudioError {
                reason: "fingerprint service down".into(),
            });
        }
        Ok(BgmProfile {
            style: "lofi".into(),
            mood: "relaxed".into(),
            instruments: vec!["piano".into()],
            tempo: Some(84.0),
        })
    }
}

pub struct FakeStore {
    pub fail: bool,
    uploads: AtomicUsize,
}

impl FakeStore {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn upload(&self, name: &str, _bytes: &[u8]) -> Result<String, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(UploadError {
                reason: "bucket unreachable".into(),
            });
        }
        Ok(format!("https://store.test/{name}"))
    }
}

pub struct FakeSpeech;

#[async_trait]
impl SpeechRecognizer for FakeSpeech {
    async fn transcribe(&self, _audio: &MediaRef) -> Result<Transcript, AsrError> {
        Ok(Transcript {
            text: "hello there".into(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.5,
                text: "hello there".into(),
            }],
            language: "en".into(),
        })
    }
}

#[derive(Default)]
pub struct FakeSearch {
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(vec![SearchHit {
            title: "Hook trends".into(),
            url: "https://example.test/trends".into(),
            summary: "Question hooks outperform".into(),
        }])
    }
}

pub struct Fakes {
    pub extractor: Arc<FakeExtractor>,
    pub vision: Arc<FakeVision>,
    pub audio: Arc<FakeAudio>,
    pub store: Option<Arc<FakeStore>>,
    pub speech: Option<Arc<FakeSpeech>>,
    pub search: Option<Arc<FakeSearch>>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            extractor: Arc::new(FakeExtractor::new(6.0, &[0.0, 2.0, 4.0])),
            vision: Arc::new(FakeVision::standard()),
            audio: Arc::new(FakeAudio { fail: false }),
            store: None,
            speech: None,
            search: None,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            extractor: self.extractor.clone(),
            speech: self
                .speech
                .clone()
                .map(|s| s as Arc<dyn SpeechRecognizer>),
            vision: self.vision.clone(),
            audio: self.audio.clone(),
            store: self.store.clone().map(|s| s as Arc<dyn ObjectStore>),
            search: self.search.clone().map(|s| s as Arc<dyn WebSearch>),
        }
    }
}

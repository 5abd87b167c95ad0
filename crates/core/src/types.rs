use serde::{Deserialize, Serialize};

/// Speech transcript of the source audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Transcript {
    /// Concatenated text of every transcript segment overlapping `[start, end)`.
    pub fn text_between(&self, start: f64, end: f64) -> Option<String> {
        let text = self
            .segments
            .iter()
            .filter(|seg| seg.start < end && seg.end > start)
            .map(|seg| seg.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if text.is_empty() { None } else { Some(text) }
    }
}

/// Where the stages after preprocessing can reach the media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    Url { url: String },
    Inline { mime: String, data: String },
}

impl MediaRef {
    pub fn url(url: impl Into<String>) -> Self {
        MediaRef::Url { url: url.into() }
    }

    /// Something a vision endpoint accepts as an image/video URL.
    pub fn as_uri(&self) -> String {
        match self {
            MediaRef::Url { url } => url.clone(),
            MediaRef::Inline { mime, data } => format!("data:{mime};base64,{data}"),
        }
    }
}

/// Media the caller asked us to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    Remote { url: String },
    Local { path: std::path::PathBuf },
}

impl MediaSource {
    pub fn parse(input: &str) -> Self {
        if input.starts_with("http://") || input.starts_with("https://") {
            MediaSource::Remote {
                url: input.to_string(),
            }
        } else {
            MediaSource::Local {
                path: input.into(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaDelivery {
    #[serde(rename = "remote")]
    Remote,
    #[serde(rename = "inline")]
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub image: MediaRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub duration: f64,
    pub frames: Vec<Frame>,
    pub transcript: Option<Transcript>,
    pub audio: Option<MediaRef>,
}

/// Everything the preprocessing stage learned about the media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub media: MediaRef,
    pub delivery: MediaDelivery,
    pub duration: f64,
    pub frames: Vec<Frame>,
    pub transcript: Option<Transcript>,
    pub audio: Option<MediaRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotType {
    ExtremeCloseUp,
    CloseUp,
    Medium,
    Full,
    Wide,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMovement {
    Static,
    Pan,
    Tilt,
    Zoom,
    Tracking,
    Handheld,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub shot_type: ShotType,
    #[serde(default)]
    pub camera_movement: CameraMovement,
    #[serde(default)]
    pub visual_description: Option<String>,
    #[serde(default)]
    pub audio_description: Option<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub frame_refs: Vec<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgmProfile {
    pub style: String,
    pub mood: String,
    pub instruments: Vec<String>,
    pub tempo: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownResult {
    pub duration: f64,
    pub segments: Vec<SceneSegment>,
    pub bgm: Option<BgmProfile>,
    pub transcript_available: bool,
    pub media_delivery: MediaDelivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

/// A degradation reason recorded by a stage, surfaced verbatim in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedNote {
    pub stage: String,
    pub reason: String,
}

/// One leading scene as the hook scorer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSegment {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub shot_type: ShotType,
    pub camera_movement: CameraMovement,
    pub visual_description: Option<String>,
    pub audio_description: Option<String>,
    pub frame_refs: Vec<MediaRef>,
}

/// Opening-window slice of a breakdown, derived before hook scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSegmentsContext {
    pub window_secs: f64,
    pub segments: Vec<HookSegment>,
    pub segment_count: usize,
    pub total_duration: f64,
    pub frame_count: usize,
}

impl HookSegmentsContext {
    pub fn frames(&self) -> Vec<MediaRef> {
        self.segments
            .iter()
            .flat_map(|s| s.frame_refs.iter().cloned())
            .collect()
    }
}

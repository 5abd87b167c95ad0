//! Scene breakdown: preprocess → vision → bgm → assemble.

use std::path::Path;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    collaborators::{VisionReply, VisionRequest},
    config::PipelineConfig,
    error::{StageError, TimelineError},
    format::format_breakdown_markdown,
    repair::extract_json_candidate,
    stages::{
        ChainOutcome, FilteredSequence, HookedStage, Stage, StageContext, StageOutcome,
        call_vision_chain,
    },
    state::{Fidelity, StateKey},
    types::{
        BgmProfile, BreakdownResult, CameraMovement, Frame, MediaDelivery, MediaRef, MediaSource,
        PreprocessResult, SceneSegment, ShotType,
    },
};

pub const PIPELINE: &str = "breakdown";

pub const ASR_NOT_CONFIGURED: &str = "ASR not configured";
pub const VISION_UNAVAILABLE: &str = "vision analysis unavailable";
pub const VISION_TIMELINE_REJECTED: &str = "vision timeline rejected";

static SCENE_PROMPT: &str = r#"
  You are a short-video shot analyst.

  INPUT: key frames of one video in time order, and a JSON context with the
  video duration and the timestamp of each frame.

  TASK: group the frames into scenes (shots). For each scene give its time
  range, shot type, camera movement, what is visible, and a short category tag.

  OUTPUT: Return ONLY valid JSON:
  {
    "scenes": [
      {
        "start": 0.0,
        "end": 2.4,
        "shot_type": "close_up | extreme_close_up | medium | full | wide",
        "camera_movement": "static | pan | tilt | zoom | tracking | handheld",
        "visual_description": "What is on screen",
        "tag": "product shot"
      }
    ]
  }

  RULES:
  - The first scene starts at 0 and the last ends at the video duration
  - Scenes are sequential with no gaps or overlaps
"#;

pub fn breakdown_pipeline(config: &PipelineConfig) -> FilteredSequence {
    FilteredSequence::new(
        PIPELINE,
        vec![
            HookedStage::new(PreprocessStage),
            HookedStage::new(VisionStage),
            HookedStage::new(BgmStage),
            HookedStage::new(AssembleStage {
                frames_per_scene: config.frames_per_scene,
                tolerance: config.boundary_tolerance_secs,
            }),
        ],
    )
}

/// Checks that `segments` tile `[0, duration]` in order.
pub fn validate_timeline(
    segments: &[SceneSegment],
    duration: f64,
    tolerance: f64,
) -> Result<(), TimelineError> {
    if !(duration.is_finite() && duration > 0.0) {
        return Err(TimelineError::InvalidDuration(duration));
    }
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return Err(TimelineError::Empty);
    };

    for (index, seg) in segments.iter().enumerate() {
        if !(seg.end > seg.start) {
            return Err(TimelineError::Reversed {
                index,
                start: seg.start,
                end: seg.end,
            });
        }
    }
    if first.start.abs() > tolerance {
        return Err(TimelineError::LateStart { start: first.start });
    }
    for (index, pair) in segments.windows(2).enumerate() {
        let (prev_end, start) = (pair[0].end, pair[1].start);
        if start - prev_end > tolerance {
            return Err(TimelineError::Gap {
                index,
                prev_end,
                start,
            });
        }
        if prev_end - start > tolerance {
            return Err(TimelineError::Overlap {
                index,
                prev_end,
                start,
            });
        }
    }
    if (last.end - duration).abs() > tolerance {
        return Err(TimelineError::Span {
            end: last.end,
            duration,
        });
    }
    Ok(())
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "video/mp4",
    }
}

/// Makes the media reachable and extracts frames and transcript.
pub struct PreprocessStage;

impl PreprocessStage {
    pub const ID: &'static str = "breakdown.preprocess";

    /// Upload once; inline the bytes if that is not possible.
    async fn deliver(
        ctx: &StageContext<'_>,
        path: &Path,
        reasons: &mut Vec<String>,
    ) -> Result<(MediaRef, MediaDelivery), StageError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        let upload_failure = match &ctx.collaborators.store {
            None => "object storage not configured".to_string(),
            Some(store) => match ctx.bounded("object_store", store.upload(&name, &bytes)).await {
                Ok(Ok(url)) => {
                    info!(stage = Self::ID, %url, "media uploaded");
                    return Ok((MediaRef::url(url), MediaDelivery::Remote));
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            },
        };

        warn!(stage = Self::ID, reason = %upload_failure, bytes = bytes.len(), "inlining media");
        reasons.push(format!(
            "storage fallback: {upload_failure}; media delivered inline"
        ));
        Ok((
            MediaRef::Inline {
                mime: mime_for(path).to_string(),
                data: STANDARD.encode(&bytes),
            },
            MediaDelivery::Inline,
        ))
    }
}

#[async_trait]
impl Stage for PreprocessStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        vec![StateKey::SourceMedia]
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::PreprocessResult]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let source: MediaSource = match ctx.require(StateKey::SourceMedia) {
            Ok(source) => source,
            Err(e) => return StageOutcome::Failed(e),
        };
        let mut reasons = Vec::new();

        let (media, delivery) = match &source {
            MediaSource::Remote { url } => (MediaRef::url(url.clone()), MediaDelivery::Remote),
            MediaSource::Local { path } => match Self::deliver(ctx, path, &mut reasons).await {
                Ok(delivered) => delivered,
                Err(e) => return StageOutcome::Failed(e),
            },
        };

        let collaborators = ctx.collaborators;
        let extraction = match ctx
            .bounded("frame_extractor", collaborators.extractor.extract(&media))
            .await
        {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(e)) => return StageOutcome::failed(e),
            Err(e) => return StageOutcome::Failed(e),
        };
        debug!(
            stage = Self::ID,
            frames = extraction.frames.len(),
            duration = extraction.duration,
            "extracted"
        );

        let transcript = match (extraction.transcript, &collaborators.speech) {
            (Some(transcript), _) => Some(transcript),
            (None, None) => {
                reasons.push(ASR_NOT_CONFIGURED.to_string());
                None
            }
            (None, Some(speech)) => {
                let audio = extraction.audio.clone().unwrap_or_else(|| media.clone());
                match ctx.bounded("speech", speech.transcribe(&audio)).await {
                    Ok(Ok(transcript)) => Some(transcript),
                    Ok(Err(e)) => {
                        reasons.push(format!("{e}; continuing without transcript"));
                        None
                    }
                    Err(e) => {
                        reasons.push(format!("{e}; continuing without transcript"));
                        None
                    }
                }
            }
        };

        let result = PreprocessResult {
            media,
            delivery,
            duration: extraction.duration,
            frames: extraction.frames,
            transcript,
            audio: extraction.audio,
        };
        let output = format!(
            "{} frames over {:.1}s, transcript {}, media delivered {}",
            result.frames.len(),
            result.duration,
            if result.transcript.is_some() { "available" } else { "absent" },
            match result.delivery {
                MediaDelivery::Remote => "by URL",
                MediaDelivery::Inline => "inline",
            }
        );

        if let Err(e) = ctx.state.set_serialized(
            StateKey::PreprocessResult,
            &result,
            Fidelity::Validated,
            Self::ID,
        ) {
            return StageOutcome::failed(e);
        }
        StageOutcome::degraded(output, reasons)
    }
}

#[derive(Deserialize)]
struct SceneDraft {
    start: f64,
    end: f64,
    #[serde(default)]
    shot_type: ShotType,
    #[serde(default)]
    camera_movement: CameraMovement,
    #[serde(default)]
    visual_description: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

/// Reads `{"scenes": [...]}` or a bare list, from JSON or from prose around it.
pub fn parse_scene_drafts(reply: &VisionReply) -> Option<Vec<SceneSegment>> {
    let value = match reply {
        VisionReply::Structured(value) => value.clone(),
        VisionReply::FreeText(text) => parse_embedded(text)?,
        VisionReply::ToolCall(_) => return None,
    };
    scenes_from_value(value)
}

fn parse_embedded(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    let candidate = extract_json_candidate(text)?;
    serde_json::from_str(candidate).ok()
}

fn scenes_from_value(value: Value) -> Option<Vec<SceneSegment>> {
    let list = match value {
        Value::Object(mut map) => map.remove("scenes")?,
        list @ Value::Array(_) => list,
        _ => return None,
    };
    let drafts: Vec<SceneDraft> = serde_json::from_value(list).ok()?;
    if drafts.is_empty() {
        return None;
    }
    Some(
        drafts
            .into_iter()
            .map(|d| SceneSegment {
                start: d.start,
                end: d.end,
                shot_type: d.shot_type,
                camera_movement: d.camera_movement,
                visual_description: d.visual_description.filter(|s| !s.trim().is_empty()),
                audio_description: None,
                tag: d.tag.unwrap_or_else(|| "untagged".to_string()),
                frame_refs: Vec::new(),
            })
            .collect(),
    )
}

/// One scene per extracted frame, in extraction order, spanning `[0, duration]`.
///
/// Order is kept as extracted so a malformed frame sequence still fails
/// timeline validation instead of being silently repaired.
pub fn scenes_from_frames(frames: &[Frame], duration: f64) -> Vec<SceneSegment> {
    if frames.is_empty() {
        return vec![SceneSegment {
            start: 0.0,
            end: duration,
            shot_type: ShotType::Unknown,
            camera_movement: CameraMovement::Unknown,
            visual_description: None,
            audio_description: None,
            tag: "unclassified".to_string(),
            frame_refs: Vec::new(),
        }];
    }

    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| SceneSegment {
            start: if i == 0 { 0.0 } else { frame.timestamp },
            end: frames.get(i + 1).map(|f| f.timestamp).unwrap_or(duration),
            shot_type: ShotType::Unknown,
            camera_movement: CameraMovement::Unknown,
            visual_description: None,
            audio_description: None,
            tag: "unclassified".to_string(),
            frame_refs: vec![frame.image.clone()],
        })
        .collect()
}

/// Groups frames into scenes through the vision model chain.
pub struct VisionStage;

impl VisionStage {
    pub const ID: &'static str = "breakdown.vision";
}

#[async_trait]
impl Stage for VisionStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        vec![StateKey::PreprocessResult]
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::VisionScenes]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let pre: PreprocessResult = match ctx.require(StateKey::PreprocessResult) {
            Ok(pre) => pre,
            Err(e) => return StageOutcome::Failed(e),
        };

        let request = VisionRequest::new(
            SCENE_PROMPT,
            pre.frames.iter().map(|f| f.image.clone()).collect(),
        )
        .with_context(json!({
            "duration": pre.duration,
            "frame_timestamps": pre.frames.iter().map(|f| f.timestamp).collect::<Vec<_>>(),
        }));

        let outcome = call_vision_chain(ctx, &request).await;
        let mut reasons = Vec::new();
        reasons.extend(outcome.fallback_reason());

        let parsed = match &outcome {
            ChainOutcome::Reply { reply, .. } => parse_scene_drafts(reply),
            ChainOutcome::Invalid { raw, .. } => parse_embedded(raw).and_then(scenes_from_value),
            ChainOutcome::Exhausted { .. } => None,
        };
        let mut rejected = false;
        let parsed = parsed.and_then(|scenes| {
            match validate_timeline(&scenes, pre.duration, ctx.config.boundary_tolerance_secs) {
                Ok(()) => Some(scenes),
                Err(e) => {
                    warn!(stage = Self::ID, error = %e, "model scene timeline rejected");
                    reasons.push(format!(
                        "{VISION_TIMELINE_REJECTED}: {e}; scenes derived from frames"
                    ));
                    rejected = true;
                    None
                }
            }
        });

        let (scenes, fidelity) = match parsed {
            Some(scenes) => {
                let fidelity = match outcome {
                    ChainOutcome::Invalid { .. } => Fidelity::Repaired,
                    _ => Fidelity::Validated,
                };
                (scenes, fidelity)
            }
            None => {
                if !rejected {
                    if let ChainOutcome::Exhausted { errors } = &outcome {
                        warn!(stage = Self::ID, ?errors, "vision chain exhausted");
                    } else {
                        warn!(stage = Self::ID, "vision reply had no usable scene list");
                    }
                    reasons.push(VISION_UNAVAILABLE.to_string());
                }
                (scenes_from_frames(&pre.frames, pre.duration), Fidelity::Raw)
            }
        };

        let output = format!("{} scenes drafted", scenes.len());
        if let Err(e) =
            ctx.state
                .set_serialized(StateKey::VisionScenes, &scenes, fidelity, Self::ID)
        {
            return StageOutcome::failed(e);
        }
        StageOutcome::degraded(output, reasons)
    }
}

/// Background-music profile of the audio track.
pub struct BgmStage;

impl BgmStage {
    pub const ID: &'static str = "breakdown.bgm";
}

#[async_trait]
impl Stage for BgmStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        vec![StateKey::PreprocessResult]
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::BgmProfile]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let pre: PreprocessResult = match ctx.require(StateKey::PreprocessResult) {
            Ok(pre) => pre,
            Err(e) => return StageOutcome::Failed(e),
        };
        let audio = pre.audio.unwrap_or(pre.media);

        let audio_analyzer = ctx.collaborators.audio.clone();
        let failure = match ctx.bounded("audio", audio_analyzer.analyze(&audio)).await {
            Ok(Ok(profile)) => {
                let output = format!("{} / {}", profile.style, profile.mood);
                if let Err(e) = ctx.state.set_serialized(
                    StateKey::BgmProfile,
                    &profile,
                    Fidelity::Validated,
                    Self::ID,
                ) {
                    return StageOutcome::failed(e);
                }
                return StageOutcome::success(output);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        StageOutcome::degraded(
            "no background music profile",
            vec![format!("BGM analysis skipped: {failure}")],
        )
    }
}

/// Terminal stage: merges and validates everything into `breakdown_result`.
pub struct AssembleStage {
    frames_per_scene: usize,
    tolerance: f64,
}

impl AssembleStage {
    pub const ID: &'static str = "breakdown.assemble";
}

#[async_trait]
impl Stage for AssembleStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        vec![StateKey::PreprocessResult, StateKey::VisionScenes]
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::BreakdownResult]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let pre: PreprocessResult = match ctx.require(StateKey::PreprocessResult) {
            Ok(pre) => pre,
            Err(e) => return StageOutcome::Failed(e),
        };
        let mut segments: Vec<SceneSegment> = match ctx.require(StateKey::VisionScenes) {
            Ok(segments) => segments,
            Err(e) => return StageOutcome::Failed(e),
        };
        let bgm: Option<BgmProfile> = ctx.state.get_as(&StateKey::BgmProfile);

        if let Err(e) = validate_timeline(&segments, pre.duration, self.tolerance) {
            warn!(stage = Self::ID, error = %e, "rejecting scene timeline");
            return StageOutcome::failed(e);
        }

        for seg in &mut segments {
            seg.audio_description = pre
                .transcript
                .as_ref()
                .and_then(|t| t.text_between(seg.start, seg.end));
            if seg.frame_refs.is_empty() {
                seg.frame_refs = pre
                    .frames
                    .iter()
                    .filter(|f| f.timestamp >= seg.start && f.timestamp < seg.end)
                    .take(self.frames_per_scene)
                    .map(|f| f.image.clone())
                    .collect();
            }
        }

        let result = BreakdownResult {
            duration: pre.duration,
            segments,
            bgm,
            transcript_available: pre.transcript.is_some(),
            media_delivery: pre.delivery,
        };
        let output = format_breakdown_markdown(&result);

        if let Err(e) = ctx.state.set_serialized(
            StateKey::BreakdownResult,
            &result,
            Fidelity::Validated,
            Self::ID,
        ) {
            return StageOutcome::failed(e);
        }
        StageOutcome::success(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> SceneSegment {
        SceneSegment {
            start,
            end,
            shot_type: ShotType::Medium,
            camera_movement: CameraMovement::Static,
            visual_description: Some("x".into()),
            audio_description: None,
            tag: "t".into(),
            frame_refs: Vec::new(),
        }
    }

    #[test]
    fn timeline_accepts_tiling_within_tolerance() {
        let segments = vec![seg(0.0, 2.0), seg(2.03, 5.0), seg(5.0, 9.98)];
        assert_eq!(validate_timeline(&segments, 10.0, 0.05), Ok(()));
    }

    #[test]
    fn timeline_rejects_malformed_sequences() {
        assert_eq!(validate_timeline(&[], 10.0, 0.05), Err(TimelineError::Empty));
        assert!(matches!(
            validate_timeline(&[seg(0.0, 4.0), seg(3.0, 10.0)], 10.0, 0.05),
            Err(TimelineError::Overlap { index: 0, .. })
        ));
        assert!(matches!(
            validate_timeline(&[seg(0.0, 4.0), seg(5.0, 10.0)], 10.0, 0.05),
            Err(TimelineError::Gap { index: 0, .. })
        ));
        assert!(matches!(
            validate_timeline(&[seg(0.0, 4.0), seg(4.0, 2.0)], 10.0, 0.05),
            Err(TimelineError::Reversed { index: 1, .. })
        ));
        assert!(matches!(
            validate_timeline(&[seg(1.0, 10.0)], 10.0, 0.05),
            Err(TimelineError::LateStart { .. })
        ));
        assert!(matches!(
            validate_timeline(&[seg(0.0, 8.0)], 10.0, 0.05),
            Err(TimelineError::Span { .. })
        ));
        assert_eq!(
            validate_timeline(&[seg(0.0, 8.0)], 0.0, 0.05),
            Err(TimelineError::InvalidDuration(0.0))
        );
    }

    #[test]
    fn frame_scenes_keep_extraction_order() {
        let frames = [0.0, 2.0, 1.0].map(|t| Frame {
            timestamp: t,
            image: MediaRef::url(format!("f{t}")),
        });
        let scenes = scenes_from_frames(&frames, 6.0);
        assert_eq!(scenes.len(), 3);
        assert!(scenes.iter().all(|s| s.visual_description.is_none()));
        assert!(matches!(
            validate_timeline(&scenes, 6.0, 0.05),
            Err(TimelineError::Reversed { index: 1, .. })
        ));
    }

    #[test]
    fn scene_drafts_are_read_from_prose() {
        let reply = VisionReply::FreeText(
            "Here you go:\n```json\n{\"scenes\": [{\"start\": 0, \"end\": 3.5, \"shot_type\": \"close_up\", \"tag\": \"face\"}]}\n```"
                .into(),
        );
        let scenes = parse_scene_drafts(&reply).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].shot_type, ShotType::CloseUp);
        assert_eq!(scenes[0].camera_movement, CameraMovement::Unknown);
        assert_eq!(scenes[0].tag, "face");
    }
}

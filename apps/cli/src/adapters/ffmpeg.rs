use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use shotlist_core::{
    collaborators::{ExtractError, FrameExtractor},
    types::{Extraction, Frame, MediaRef},
};
use tokio::{fs, process::Command};
use tracing::{debug, info};

use super::stderr_tail;
use crate::cache::{file_ref, get_audio_path, get_frames_dir, get_work_dir};

/// Samples frames with ffmpeg and measures the media with ffprobe.
pub struct FfmpegExtractor {
    max_frames: usize,
}

impl FfmpegExtractor {
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames: max_frames.max(1),
        }
    }

    /// ffmpeg reads URLs itself; inline media is written to the work dir first.
    async fn materialize(media: &MediaRef, work_dir: &Path) -> Result<String, ExtractError> {
        match media {
            MediaRef::Url { url } => Ok(url.strip_prefix("file://").unwrap_or(url).to_string()),
            MediaRef::Inline { mime, data } => {
                let bytes = STANDARD.decode(data).map_err(|e| {
                    ExtractError::UnsupportedFormat(format!("inline media is not base64: {e}"))
                })?;
                let path = work_dir.join(format!("source.{}", extension_for(mime)));
                fs::write(&path, bytes).await.map_err(io_error)?;
                Ok(path.to_string_lossy().into_owned())
            }
        }
    }

    async fn probe_duration(input: &str) -> Result<f64, ExtractError> {
        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input)
            .output()
            .await
            .map_err(|e| ExtractError::UnreachableMedia(format!("ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(classify_failure(input, &output.stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| *d > 0.0)
            .ok_or_else(|| {
                ExtractError::UnsupportedFormat(format!("{input}: probe reported no duration"))
            })
    }

    async fn sample_frames(
        &self,
        input: &str,
        duration: f64,
        frames_dir: &Path,
    ) -> Result<Vec<Frame>, ExtractError> {
        let interval = frame_interval(duration, self.max_frames);

        if fs::try_exists(frames_dir).await.unwrap_or(false) {
            fs::remove_dir_all(frames_dir).await.map_err(io_error)?;
        }
        fs::create_dir_all(frames_dir).await.map_err(io_error)?;

        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(format!("fps=1/{interval},scale=512:-2"))
            .arg("-frames:v")
            .arg(self.max_frames.to_string())
            .arg(frames_dir.join("frame_%04d.jpg"))
            .output()
            .await
            .map_err(|e| ExtractError::UnreachableMedia(format!("ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(classify_failure(input, &output.stderr));
        }

        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = fs::read_dir(frames_dir).await.map_err(io_error)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jpg") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            let timestamp = i as f64 * interval;
            if timestamp >= duration {
                break;
            }
            let bytes = fs::read(path).await.map_err(io_error)?;
            frames.push(Frame {
                timestamp,
                image: MediaRef::Inline {
                    mime: "image/jpeg".to_string(),
                    data: STANDARD.encode(bytes),
                },
            });
        }
        Ok(frames)
    }

    /// Mono 16 kHz track for speech and music analysis; silent media has none.
    async fn extract_audio(input: &str, audio_path: &Path) -> Option<MediaRef> {
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg(audio_path)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            debug!(input, reason = %stderr_tail(&output.stderr), "no audio track extracted");
            return None;
        }
        Some(file_ref(audio_path))
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(&self, media: &MediaRef) -> Result<Extraction, ExtractError> {
        let work_dir = get_work_dir(media);
        fs::create_dir_all(&work_dir).await.map_err(io_error)?;

        let input = Self::materialize(media, &work_dir).await?;
        let duration = Self::probe_duration(&input).await?;
        let frames = self
            .sample_frames(&input, duration, &get_frames_dir(&work_dir))
            .await?;
        let audio = Self::extract_audio(&input, &get_audio_path(&work_dir)).await;

        info!(
            frames = frames.len(),
            duration,
            audio = audio.is_some(),
            "media extracted"
        );
        Ok(Extraction {
            duration,
            frames,
            transcript: None,
            audio,
        })
    }
}

/// Seconds between sampled frames: at most `max_frames`, at most one per second.
fn frame_interval(duration: f64, max_frames: usize) -> f64 {
    (duration / max_frames as f64).max(1.0)
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        _ => "mp4",
    }
}

fn classify_failure(input: &str, stderr: &[u8]) -> ExtractError {
    let reason = stderr_tail(stderr);
    if reason.contains("Invalid data found") || reason.contains("does not contain any stream") {
        ExtractError::UnsupportedFormat(format!("{input}: {reason}"))
    } else {
        ExtractError::UnreachableMedia(format!("{input}: {reason}"))
    }
}

fn io_error(e: std::io::Error) -> ExtractError {
    ExtractError::UnreachableMedia(e.to_string())
}

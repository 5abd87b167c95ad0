use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use shotlist_core::{
    collaborators::{AsrError, SpeechRecognizer},
    types::{MediaRef, Segment, Transcript},
};
use tokio::{fs, process::Command};
use tracing::info;

use super::stderr_tail;
use crate::cache::{get_transcript_dir, local_path};

/// Runs the `whisper` command line tool on the extracted audio track.
pub struct WhisperCli {
    binary: String,
    model: String,
}

impl WhisperCli {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

fn parse_whisper_output(json: &str) -> Result<Transcript, AsrError> {
    let output: WhisperOutput = serde_json::from_str(json).map_err(|e| AsrError {
        reason: format!("unreadable whisper output: {e}"),
    })?;

    Ok(Transcript {
        text: output.text.trim().to_string(),
        segments: output
            .segments
            .into_iter()
            .map(|s| Segment {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
            })
            .collect(),
        language: output.language.unwrap_or_else(|| "unknown".to_string()),
    })
}

#[async_trait]
impl SpeechRecognizer for WhisperCli {
    async fn transcribe(&self, audio: &MediaRef) -> Result<Transcript, AsrError> {
        let audio_path = local_path(audio).ok_or_else(|| AsrError {
            reason: "speech recognition needs a local audio file".to_string(),
        })?;
        let out_dir = get_transcript_dir(audio_path.parent().unwrap_or(Path::new(".")));
        fs::create_dir_all(&out_dir).await.map_err(|e| AsrError {
            reason: e.to_string(),
        })?;

        let output = Command::new(&self.binary)
            .arg(&audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(&out_dir)
            .output()
            .await
            .map_err(|e| AsrError {
                reason: format!("{}: {e}", self.binary),
            })?;

        if !output.status.success() {
            return Err(AsrError {
                reason: stderr_tail(&output.stderr),
            });
        }

        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let json = fs::read_to_string(out_dir.join(format!("{stem}.json")))
            .await
            .map_err(|e| AsrError {
                reason: format!("whisper wrote no transcript: {e}"),
            })?;

        let transcript = parse_whisper_output(&json)?;
        info!(
            segments = transcript.segments.len(),
            language = %transcript.language,
            "transcribed"
        );
        Ok(transcript)
    }
}

//! Concrete collaborators: local processes for media work, HTTP for the rest.

mod ffmpeg;
mod http;
mod vision;
mod whisper;

pub use ffmpeg::FfmpegExtractor;
pub use http::{HttpAudioAnalyzer, HttpObjectStore, HttpWebSearch};
pub use vision::ChatVisionScorer;
pub use whisper::WhisperCli;

/// Last few stderr lines of a failed process.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

/// Response bodies quoted in errors are cut to this many characters.
const BODY_PREVIEW: usize = 300;

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_the_last_lines() {
        let stderr = b"banner\n\nline one\nline two\nline three\n";
        assert_eq!(stderr_tail(stderr), "line one | line two | line three");
        assert_eq!(stderr_tail(b""), "");
    }
}

//! Service endpoints for the collaborator adapters.

/// Read from the environment; every service except vision is optional.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// BGM analysis endpoint; without it the BGM stage degrades.
    pub audio_url: Option<String>,
    /// Base URL media is PUT to; without it local files are sent inline.
    pub upload_url: Option<String>,
    /// Public prefix for uploaded objects, when it differs from `upload_url`.
    pub upload_public_url: Option<String>,
    pub upload_token: Option<String>,
    pub search_url: Option<String>,
    pub search_key: Option<String>,
    /// Upper bound on sampled frames per video.
    pub max_frames: usize,
    pub whisper_bin: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            audio_url: None,
            upload_url: None,
            upload_public_url: None,
            upload_token: None,
            search_url: None,
            search_key: None,
            max_frames: 24,
            whisper_bin: "whisper".to_string(),
        }
    }
}

impl ServiceSettings {
    /// Create settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            audio_url: var("SHOTLIST_AUDIO_URL"),
            upload_url: var("SHOTLIST_UPLOAD_URL"),
            upload_public_url: var("SHOTLIST_UPLOAD_PUBLIC_URL"),
            upload_token: var("SHOTLIST_UPLOAD_TOKEN"),
            search_url: var("SHOTLIST_SEARCH_URL"),
            search_key: var("SHOTLIST_SEARCH_KEY"),
            max_frames: var("SHOTLIST_MAX_FRAMES")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_frames),
            whisper_bin: var("SHOTLIST_WHISPER_BIN").unwrap_or(defaults.whisper_bin),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

//! Pipeline configuration.

use std::time::Duration;

/// Ordered vision models to try, and how often to try each one.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChain {
    pub models: Vec<String>,
    /// Attempts per model on `ModelUnavailable`, at least 1.
    pub attempts_per_model: u32,
}

impl ModelChain {
    pub fn new(models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            attempts_per_model: 1,
        }
    }

    pub fn with_attempts(mut self, attempts_per_model: u32) -> Self {
        self.attempts_per_model = attempts_per_model.max(1);
        self
    }
}

impl Default for ModelChain {
    fn default() -> Self {
        Self::new(["doubao-seed-1-6-vision", "gpt-4o-mini"])
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Length of the opening window scored as the hook.
    pub hook_window_secs: f64,
    pub vision_chain: ModelChain,
    /// Upper bound on a single collaborator call.
    pub call_timeout: Duration,
    /// Tool-call rounds a judgment stage may take before answering.
    pub max_tool_rounds: usize,
    /// Frame references kept per scene.
    pub frames_per_scene: usize,
    /// Slack allowed when checking scene boundaries.
    pub boundary_tolerance_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hook_window_secs: 3.0,
            vision_chain: ModelChain::default(),
            call_timeout: Duration::from_secs(120),
            max_tool_rounds: 2,
            frames_per_scene: 3,
            boundary_tolerance_secs: 0.05,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let vision_chain = match std::env::var("SHOTLIST_VISION_MODELS") {
            Ok(models) => {
                let models: Vec<String> = models
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect();
                if models.is_empty() {
                    defaults.vision_chain.clone()
                } else {
                    ModelChain::new(models)
                }
            }
            Err(_) => defaults.vision_chain.clone(),
        }
        .with_attempts(
            std::env::var("SHOTLIST_VISION_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.vision_chain.attempts_per_model),
        );

        Self {
            hook_window_secs: std::env::var("SHOTLIST_HOOK_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|w: &f64| *w > 0.0)
                .unwrap_or(defaults.hook_window_secs),
            vision_chain,
            call_timeout: Duration::from_secs(
                std::env::var("SHOTLIST_CALL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.call_timeout.as_secs()),
            ),
            max_tool_rounds: std::env::var("SHOTLIST_MAX_TOOL_ROUNDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tool_rounds),
            ..defaults
        }
    }
}

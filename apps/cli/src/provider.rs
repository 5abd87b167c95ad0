#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing API key for {provider_name}: set {env_var}")]
    MissingApiKey {
        provider_name: String,
        env_var: &'static str,
    },
}

/// OpenAI-compatible chat endpoints that accept images.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Doubao,
    Openai,
    Gemini,
}

pub struct ProviderConfig {
    pub api_url: &'static str,
    /// Vision models tried in order, primary first.
    pub models: &'static [&'static str],
    pub env_var: &'static str,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Doubao => ProviderConfig {
                api_url: "https://ark.cn-beijing.volces.com/api/v3/chat/completions",
                models: &["doubao-seed-1-6-vision-250815", "doubao-1-5-vision-pro-32k-250115"],
                env_var: "ARK_API_KEY",
            },
            Provider::Openai => ProviderConfig {
                api_url: "https://api.openai.com/v1/chat/completions",
                models: &["gpt-4o", "gpt-4o-mini"],
                env_var: "OPENAI_API_KEY",
            },
            Provider::Gemini => ProviderConfig {
                api_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
                models: &["gemini-2.5-flash", "gemini-2.5-flash-lite"],
                env_var: "GEMINI_API_KEY",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Doubao => "Doubao",
            Provider::Openai => "OpenAI",
            Provider::Gemini => "Gemini",
        }
    }

    /// Validate that the API key is set for this provider
    pub fn validate_api_key(&self) -> Result<String, ProviderError> {
        let config = self.config();
        std::env::var(config.env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider_name: self.name().to_string(),
                env_var: config.env_var,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_has_a_fallback_model() {
        for provider in [Provider::Doubao, Provider::Openai, Provider::Gemini] {
            let config = provider.config();
            assert!(config.models.len() >= 2, "{}", provider.name());
            assert!(config.api_url.ends_with("/chat/completions"));
        }
    }
}

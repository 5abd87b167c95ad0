use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::json;
use shotlist_core::{
    collaborators::{
        AudioAnalyzer, AudioError, ObjectStore, SearchError, UploadError, WebSearch,
    },
    types::{BgmProfile, MediaRef, SearchHit},
};
use tokio::fs;
use uuid::Uuid;

use super::preview;
use crate::cache::local_path;

/// Posts the audio track to a music-analysis service.
pub struct HttpAudioAnalyzer {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpAudioAnalyzer {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[derive(Deserialize)]
struct AudioResponse {
    #[serde(default)]
    style: String,
    #[serde(default)]
    mood: String,
    #[serde(default)]
    instruments: Vec<String>,
    tempo: Option<f64>,
}

impl From<AudioResponse> for BgmProfile {
    fn from(r: AudioResponse) -> Self {
        BgmProfile {
            style: r.style,
            mood: r.mood,
            instruments: r.instruments,
            tempo: r.tempo,
        }
    }
}

#[async_trait]
impl AudioAnalyzer for HttpAudioAnalyzer {
    async fn analyze(&self, audio: &MediaRef) -> Result<BgmProfile, AudioError> {
        let fail = |reason: String| AudioError { reason };
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| fail("audio analysis endpoint not configured".to_string()))?;

        let uri = match local_path(audio) {
            Some(path) => {
                let bytes = fs::read(&path).await.map_err(|e| fail(e.to_string()))?;
                format!("data:audio/wav;base64,{}", STANDARD.encode(bytes))
            }
            None => audio.as_uri(),
        };

        let response = self
            .client
            .post(endpoint)
            .json(&json!({ "audio": uri }))
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| fail(e.to_string()))?;
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}: {}", preview(&body))));
        }

        let parsed: AudioResponse =
            serde_json::from_str(&body).map_err(|e| fail(format!("unreadable response: {e}")))?;
        Ok(parsed.into())
    }
}

/// PUTs media under a base URL and hands back its public address.
pub struct HttpObjectStore {
    client: reqwest::Client,
    upload_url: String,
    public_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(upload_url: String, public_url: Option<String>, token: Option<String>) -> Self {
        let upload_url = upload_url.trim_end_matches('/').to_string();
        let public_url = public_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| upload_url.clone());
        Self {
            client: reqwest::Client::new(),
            upload_url,
            public_url,
            token,
        }
    }

    fn object_name(name: &str) -> String {
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}-{safe}", Uuid::new_v4())
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<String, UploadError> {
        let object = Self::object_name(name);
        let mut request = self
            .client
            .put(format!("{}/{object}", self.upload_url))
            .body(bytes.to_vec());
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| UploadError {
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError {
                reason: format!("HTTP {status}: {}", preview(&body)),
            });
        }
        Ok(format!("{}/{object}", self.public_url))
    }
}

/// Search API answering `{"results": [{"title", "url", "content"}]}`.
pub struct HttpWebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpWebSearch {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default, alias = "snippet")]
    content: String,
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let fail = |reason: String| SearchError { reason };
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "max_results": 5 }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| fail(e.to_string()))?;
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}: {}", preview(&body))));
        }

        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| fail(format!("unreadable response: {e}")))?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                summary: r.content,
            })
            .collect())
    }
}

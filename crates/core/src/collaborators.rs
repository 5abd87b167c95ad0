//! Capabilities the pipeline calls out to.
//!
//! Each trait is the whole contract the core relies on: inputs, output shape
//! and failure signal. Implementations live with the binary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{BgmProfile, Extraction, MediaRef, SearchHit, Transcript};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("media unreachable: {0}")]
    UnreachableMedia(String),

    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("speech recognition failed: {reason}")]
pub struct AsrError {
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VisionError {
    #[error("model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("model {model} returned an invalid response")]
    InvalidResponse { model: String, raw: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("audio analysis failed: {reason}")]
pub struct AudioError {
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("upload failed: {reason}")]
pub struct UploadError {
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("search failed: {reason}")]
pub struct SearchError {
    pub reason: String,
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, media: &MediaRef) -> Result<Extraction, ExtractError>;
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, audio: &MediaRef) -> Result<Transcript, AsrError>;
}

/// A sub-call a judgment-producing model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    pub instruction: String,
    pub images: Vec<MediaRef>,
    pub context: Option<Value>,
    /// Tools the model may call, by name.
    pub tools: Vec<String>,
    /// Results of calls made in earlier rounds of the same request.
    pub tool_results: Vec<ToolResult>,
}

impl VisionRequest {
    pub fn new(instruction: impl Into<String>, images: Vec<MediaRef>) -> Self {
        Self {
            instruction: instruction.into(),
            images,
            context: None,
            tools: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisionReply {
    Structured(Value),
    FreeText(String),
    ToolCall(ToolCall),
}

#[async_trait]
pub trait VisionScorer: Send + Sync {
    async fn analyze(&self, model: &str, request: &VisionRequest)
    -> Result<VisionReply, VisionError>;
}

#[async_trait]
pub trait AudioAnalyzer: Send + Sync {
    async fn analyze(&self, audio: &MediaRef) -> Result<BgmProfile, AudioError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` and returns a URL the other collaborators can fetch.
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<String, UploadError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// The set of collaborators one job runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn FrameExtractor>,
    pub speech: Option<Arc<dyn SpeechRecognizer>>,
    pub vision: Arc<dyn VisionScorer>,
    pub audio: Arc<dyn AudioAnalyzer>,
    pub store: Option<Arc<dyn ObjectStore>>,
    pub search: Option<Arc<dyn WebSearch>>,
}

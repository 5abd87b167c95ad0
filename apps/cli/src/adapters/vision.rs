use async_trait::async_trait;
use serde_json::{Value, json};
use shotlist_core::{
    collaborators::{ToolCall, VisionError, VisionReply, VisionRequest, VisionScorer},
    pipelines::hook::{ANALYZE_HOOK_SEGMENTS, WEB_SEARCH},
};
use tracing::debug;

use super::preview;
use crate::provider::{Provider, ProviderConfig, ProviderError};

/// Vision scoring over an OpenAI-compatible chat completions endpoint.
pub struct ChatVisionScorer {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
}

impl ChatVisionScorer {
    pub fn new(provider: &Provider) -> Result<Self, ProviderError> {
        Ok(Self {
            client: reqwest::Client::new(),
            config: provider.config(),
            api_key: provider.validate_api_key()?,
        })
    }
}

fn tool_definition(name: &str) -> Value {
    let (description, parameters) = match name {
        ANALYZE_HOOK_SEGMENTS => (
            "Returns the opening scenes of the video with timing, shot type and speech",
            json!({"type": "object", "properties": {}}),
        ),
        WEB_SEARCH => (
            "Searches the web for trends and comparable videos",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        ),
        _ => ("", json!({"type": "object", "properties": {}})),
    };
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

fn build_body(model: &str, request: &VisionRequest) -> Value {
    let mut text = String::new();
    if let Some(context) = &request.context {
        text.push_str("Context:\n");
        text.push_str(&context.to_string());
        text.push('\n');
    }
    for result in &request.tool_results {
        text.push_str(&format!("Result of {}:\n{}\n", result.name, result.content));
    }
    if text.is_empty() {
        text.push_str("Analyze the attached frames.");
    }

    let mut content = vec![json!({"type": "text", "text": text})];
    content.extend(request.images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": {"url": image.as_uri()},
        })
    }));

    let mut body = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": request.instruction},
            {"role": "user", "content": content},
        ],
        "temperature": 0.2,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(|t| tool_definition(t)).collect());
    }
    body
}

/// Tool calls win over text; JSON text is structured, anything else free text.
fn reply_from_completion(model: &str, response: &Value) -> Result<VisionReply, VisionError> {
    let message = &response["choices"][0]["message"];

    if let Some(call) = message["tool_calls"].as_array().and_then(|c| c.first()) {
        let function = &call["function"];
        let name = function["name"].as_str().unwrap_or_default().to_string();
        // arguments arrive as a JSON string; the stage's sanitizers decode it
        let arguments = function["arguments"].clone();
        return Ok(VisionReply::ToolCall(ToolCall { name, arguments }));
    }

    match message["content"].as_str().map(str::trim) {
        Some(text) if !text.is_empty() => match serde_json::from_str::<Value>(text) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Ok(VisionReply::Structured(value)),
            _ => Ok(VisionReply::FreeText(text.to_string())),
        },
        _ => Err(VisionError::InvalidResponse {
            model: model.to_string(),
            raw: preview(&response.to_string()),
        }),
    }
}

#[async_trait]
impl VisionScorer for ChatVisionScorer {
    async fn analyze(
        &self,
        model: &str,
        request: &VisionRequest,
    ) -> Result<VisionReply, VisionError> {
        let unavailable = |reason: String| VisionError::ModelUnavailable {
            model: model.to_string(),
            reason,
        };

        debug!(model, images = request.images.len(), "vision request");
        let response = self
            .client
            .post(self.config.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&build_body(model, request))
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}: {}", preview(&body))));
        }

        let response: Value =
            serde_json::from_str(&body).map_err(|_| VisionError::InvalidResponse {
                model: model.to_string(),
                raw: body.clone(),
            })?;
        reply_from_completion(model, &response)
    }
}

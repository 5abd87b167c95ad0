//! Repair pass for hook-score judgments.
//!
//! A judgment arrives either as a JSON value or as model prose. A strict parse
//! is tried first; after that a fixed sequence of transforms is applied, each
//! followed by re-validation. The pass never returns a record with a missing or
//! non-numeric dimension: if the transforms run out, the error lists what was
//! tried and which dimensions could not be recovered.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    scoring::{Dimension, HookAnalysis, SCORE_MAX, SCORE_MIN},
    state::Fidelity,
};

/// Marker written for a dimension that no transform could score.
pub const UNSCORED: &str = "unscored";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    StripWrapper,
    NormalizeKeys,
    CoerceNumbers,
    ExtractFromProse,
    FillUnscored,
}

impl Transform {
    pub const ORDER: [Transform; 5] = [
        Transform::StripWrapper,
        Transform::NormalizeKeys,
        Transform::CoerceNumbers,
        Transform::ExtractFromProse,
        Transform::FillUnscored,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Transform::StripWrapper => "strip_wrapper",
            Transform::NormalizeKeys => "normalize_keys",
            Transform::CoerceNumbers => "coerce_numbers",
            Transform::ExtractFromProse => "extract_from_prose",
            Transform::FillUnscored => "fill_unscored",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformAttempt {
    pub transform: Transform,
    pub applied: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub analysis: HookAnalysis,
    pub fidelity: Fidelity,
    pub transforms: Vec<Transform>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", self.summary())]
pub struct RepairError {
    pub attempts: Vec<TransformAttempt>,
    pub unrecoverable: Vec<Dimension>,
    /// Best candidate reached, with unscored markers; never a valid record.
    pub partial: Option<Value>,
}

impl RepairError {
    pub fn summary(&self) -> String {
        let tried = self
            .attempts
            .iter()
            .map(|a| format!("{} ({})", a.transform, a.detail))
            .collect::<Vec<_>>()
            .join("; ");
        let dims = self
            .unrecoverable
            .iter()
            .map(Dimension::key)
            .collect::<Vec<_>>()
            .join(", ");
        format!("tried {tried}; unrecoverable dimensions: {dims}")
    }
}

#[derive(Debug, Default)]
struct Issue {
    missing: Vec<Dimension>,
    non_numeric: Vec<Dimension>,
    out_of_range: Vec<Dimension>,
    shape: Option<String>,
}

impl Issue {
    fn dimensions(&self) -> Vec<Dimension> {
        let mut dims: Vec<Dimension> = self
            .missing
            .iter()
            .chain(&self.non_numeric)
            .chain(&self.out_of_range)
            .copied()
            .collect();
        dims.sort();
        dims.dedup();
        dims
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let list = |dims: &[Dimension]| {
            dims.iter()
                .map(Dimension::key)
                .collect::<Vec<_>>()
                .join(", ")
        };
        if !self.missing.is_empty() {
            parts.push(format!("missing {}", list(&self.missing)));
        }
        if !self.non_numeric.is_empty() {
            parts.push(format!("non-numeric {}", list(&self.non_numeric)));
        }
        if !self.out_of_range.is_empty() {
            parts.push(format!("out of range {}", list(&self.out_of_range)));
        }
        if let Some(shape) = &self.shape {
            parts.push(shape.clone());
        }
        f.write_str(&parts.join(", "))
    }
}

enum Step {
    Applied(String),
    Skipped(String),
}

/// Turns a hook-score judgment into a complete [`HookAnalysis`].
pub fn repair_hook_score(input: &Value) -> Result<Repaired, RepairError> {
    if let Some(analysis) = strict_parse(input) {
        debug!("hook score passed strict parse");
        return Ok(Repaired {
            analysis,
            fidelity: Fidelity::Validated,
            transforms: Vec::new(),
        });
    }

    let prose = input.as_str();
    let mut candidate: Option<Map<String, Value>> = match input {
        Value::Object(map) if !looks_like_tool_envelope(map) => Some(map.clone()),
        _ => None,
    };
    let mut applied = Vec::new();
    let mut attempts = Vec::new();
    let mut last_issue: Option<Issue> = None;

    for transform in Transform::ORDER {
        let step = match transform {
            Transform::StripWrapper => strip_wrapper(input, &mut candidate),
            Transform::NormalizeKeys => normalize_keys(&mut candidate),
            Transform::CoerceNumbers => coerce_numbers(&mut candidate),
            Transform::ExtractFromProse => extract_from_prose(prose, &mut candidate),
            Transform::FillUnscored => fill_unscored(&mut candidate),
        };

        match step {
            Step::Skipped(detail) => attempts.push(TransformAttempt {
                transform,
                applied: false,
                detail,
            }),
            Step::Applied(detail) => {
                applied.push(transform);
                let Some(map) = candidate.as_ref() else {
                    attempts.push(TransformAttempt {
                        transform,
                        applied: true,
                        detail,
                    });
                    continue;
                };
                match validate(map) {
                    Ok(analysis) => {
                        info!(transforms = ?applied, "hook score repaired");
                        return Ok(Repaired {
                            analysis,
                            fidelity: Fidelity::Repaired,
                            transforms: applied,
                        });
                    }
                    Err(issue) => {
                        attempts.push(TransformAttempt {
                            transform,
                            applied: true,
                            detail: format!("{detail}; still invalid: {issue}"),
                        });
                        last_issue = Some(issue);
                    }
                }
            }
        }
    }

    let unrecoverable = match (&candidate, last_issue) {
        (Some(map), None) => validate(map).err().map(|i| i.dimensions()).unwrap_or_default(),
        (Some(_), Some(issue)) => issue.dimensions(),
        (None, _) => Dimension::ALL.to_vec(),
    };
    let error = RepairError {
        attempts,
        unrecoverable,
        partial: candidate.map(Value::Object),
    };
    warn!(error = %error, "hook score repair failed");
    Err(error)
}

fn strict_parse(input: &Value) -> Option<HookAnalysis> {
    let analysis: HookAnalysis = match input {
        Value::Object(_) => serde_json::from_value(input.clone()).ok()?,
        Value::String(text) => serde_json::from_str(text.trim()).ok()?,
        _ => return None,
    };
    analysis.out_of_range().is_empty().then_some(analysis)
}

fn validate(map: &Map<String, Value>) -> Result<HookAnalysis, Issue> {
    let mut issue = Issue::default();
    for dim in Dimension::ALL {
        match map.get(dim.key()).and_then(|v| v.get("score")) {
            None | Some(Value::Null) => issue.missing.push(dim),
            Some(Value::Number(n)) => {
                let score = n.as_f64().unwrap_or(f64::NAN);
                if !(SCORE_MIN..=SCORE_MAX).contains(&score) {
                    issue.out_of_range.push(dim);
                }
            }
            Some(_) => issue.non_numeric.push(dim),
        }
    }

    if !issue.dimensions().is_empty() {
        return Err(issue);
    }

    serde_json::from_value(Value::Object(map.clone())).map_err(|e| Issue {
        shape: Some(format!("shape error: {e}")),
        ..Issue::default()
    })
}

fn looks_like_tool_envelope(map: &Map<String, Value>) -> bool {
    (map.contains_key("name") && (map.contains_key("parameters") || map.contains_key("arguments")))
        || map.contains_key("transfer_to_agent")
        || map.contains_key("agent_name")
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("fenced block pattern is valid")
});

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d+(?:\.\d+)?)").expect("leading number pattern is valid")
});

/// First balanced `{...}` in `text`, string-literal aware.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// JSON candidate inside model prose: a fenced block first, then the first object.
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    if let Some(block) = FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        let block = block.as_str().trim();
        if !block.is_empty() {
            return Some(block);
        }
    }
    first_object(text)
}

fn strip_wrapper(input: &Value, candidate: &mut Option<Map<String, Value>>) -> Step {
    let parsed = match input {
        Value::Object(map) if looks_like_tool_envelope(map) => {
            return Step::Skipped("value is a tool-call envelope, not a score".into());
        }
        Value::Object(_) => return Step::Skipped("input is already a JSON object".into()),
        Value::Array(items) => items.first().cloned(),
        Value::String(text) => match extract_json_candidate(text) {
            Some(snippet) => match serde_json::from_str::<Value>(snippet) {
                Ok(v) => Some(v),
                Err(e) => return Step::Skipped(format!("embedded JSON does not parse: {e}")),
            },
            None => return Step::Skipped("no JSON object in text".into()),
        },
        other => return Step::Skipped(format!("cannot unwrap a {}", json_kind(other))),
    };

    let parsed = match parsed {
        Some(Value::Array(items)) => items.into_iter().next(),
        other => other,
    };

    match parsed {
        Some(Value::Object(map)) if looks_like_tool_envelope(&map) => {
            Step::Skipped("embedded JSON is a tool-call envelope, not a score".into())
        }
        Some(Value::Object(map)) => {
            *candidate = Some(map);
            Step::Applied("extracted embedded JSON object".into())
        }
        Some(other) => Step::Skipped(format!("embedded JSON is a {}", json_kind(&other))),
        None => Step::Skipped("empty list".into()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// `"Visual Impact"`, `"visualImpact"` and `"visual-impact"` all become `visual_impact`.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.trim().chars() {
        if ch.is_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        match ch {
            ' ' | '-' | '.' => out.push('_'),
            _ => out.extend(ch.to_lowercase()),
        }
    }
    out
}

enum KeyRole {
    Score(Dimension),
    Rationale(Dimension),
    Field(&'static str),
    Other,
}

fn classify_key(normalized: &str) -> KeyRole {
    for dim in Dimension::ALL {
        if dim.aliases().contains(&normalized) || normalized == format!("{}_score", dim.key()) {
            return KeyRole::Score(dim);
        }
        if dim.rationale_aliases().contains(&normalized) {
            return KeyRole::Rationale(dim);
        }
    }
    match normalized {
        "overall_score" | "overall" | "total_score" | "综合评分" => KeyRole::Field("overall_score"),
        "hook_type" | "type" | "钩子类型" => KeyRole::Field("hook_type"),
        "strengths" | "优点" | "亮点" => KeyRole::Field("strengths"),
        "weaknesses" | "不足" | "待改进" => KeyRole::Field("weaknesses"),
        "suggestions" | "建议" | "优化建议" => KeyRole::Field("suggestions"),
        "retention_prediction" | "retention" | "留存预测" => {
            KeyRole::Field("retention_prediction")
        }
        _ => KeyRole::Other,
    }
}

fn normalize_dimension_value(value: Value, rationale: Option<Value>) -> Value {
    match value {
        Value::Object(inner) => {
            let mut score = None;
            let mut text = rationale;
            for (k, v) in inner {
                match normalize_key(&k).as_str() {
                    "score" | "value" | "rating" | "points" => score = Some(v),
                    "rationale" | "comment" | "reason" | "explanation" => text = Some(v),
                    _ => {}
                }
            }
            json!({
                "score": score.unwrap_or(Value::Null),
                "rationale": text.unwrap_or_else(|| Value::String(String::new())),
            })
        }
        scalar => json!({
            "score": scalar,
            "rationale": rationale.unwrap_or_else(|| Value::String(String::new())),
        }),
    }
}

fn normalize_keys(candidate: &mut Option<Map<String, Value>>) -> Step {
    let Some(map) = candidate.take() else {
        return Step::Skipped("no JSON object to normalize".into());
    };
    let before = map.clone();

    let mut scores: Vec<(Dimension, Value)> = Vec::new();
    let mut rationales: Vec<(Dimension, Value)> = Vec::new();
    let mut out = Map::new();

    for (key, value) in map {
        match classify_key(&normalize_key(&key)) {
            KeyRole::Score(dim) => scores.push((dim, value)),
            KeyRole::Rationale(dim) => rationales.push((dim, value)),
            KeyRole::Field(name) => {
                let value = match (name, value) {
                    ("strengths" | "weaknesses" | "suggestions", Value::String(s)) => {
                        json!([s])
                    }
                    (_, v) => v,
                };
                out.insert(name.to_string(), value);
            }
            KeyRole::Other => {
                out.insert(key, value);
            }
        }
    }

    for (dim, value) in scores {
        let rationale = rationales
            .iter()
            .find(|(d, _)| *d == dim)
            .map(|(_, v)| v.clone());
        out.insert(dim.key().to_string(), normalize_dimension_value(value, rationale));
    }

    let changed = out != before;
    *candidate = Some(out);
    if changed {
        Step::Applied("mapped aliases and flattened scores to canonical keys".into())
    } else {
        Step::Skipped("keys already canonical".into())
    }
}

fn parse_score(text: &str) -> Option<f64> {
    let caps = LEADING_NUMBER.captures(text)?;
    caps.get(1)?.as_str().parse::<f64>().ok()
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(SCORE_MIN, SCORE_MAX)
}

fn coerce_numbers(candidate: &mut Option<Map<String, Value>>) -> Step {
    let Some(map) = candidate.as_mut() else {
        return Step::Skipped("no JSON object to coerce".into());
    };
    let mut coerced = Vec::new();
    let mut unparsable = Vec::new();

    for dim in Dimension::ALL {
        let Some(slot) = map.get_mut(dim.key()).and_then(|v| v.get_mut("score")) else {
            continue;
        };
        let next = match &*slot {
            Value::String(s) => match parse_score(s) {
                Some(n) => Some(clamp_score(n)),
                None => {
                    unparsable.push(dim.key());
                    None
                }
            },
            Value::Number(n) => n
                .as_f64()
                .filter(|f| !(SCORE_MIN..=SCORE_MAX).contains(f))
                .map(clamp_score),
            _ => None,
        };
        if let Some(n) = next {
            *slot = json!(n);
            coerced.push(dim.key());
        }
    }

    if let Some(Value::String(s)) = map.get("overall_score") {
        let parsed = parse_score(s).map(clamp_score);
        map.insert(
            "overall_score".into(),
            parsed.map(|n| json!(n)).unwrap_or(Value::Null),
        );
    }

    if coerced.is_empty() {
        let detail = if unparsable.is_empty() {
            "all present scores already numeric".to_string()
        } else {
            format!("unparsable scores: {}", unparsable.join(", "))
        };
        return Step::Skipped(detail);
    }
    Step::Applied(format!("coerced {}", coerced.join(", ")))
}

fn prose_pattern(alias: &str) -> Option<Regex> {
    let label = regex::escape(alias).replace('_', r"[_\s-]?");
    Regex::new(&format!(
        r#"(?i){label}["'*\s]*(?:score)?["'*\s]*[:：=]\s*["'*]*\s*(-?\d+(?:\.\d+)?)"#
    ))
    .ok()
}

fn extract_from_prose(prose: Option<&str>, candidate: &mut Option<Map<String, Value>>) -> Step {
    let Some(text) = prose else {
        return Step::Skipped("input was structured, no prose to mine".into());
    };
    let map = candidate.get_or_insert_with(Map::new);
    let mut found = Vec::new();

    for dim in Dimension::ALL {
        let present = map
            .get(dim.key())
            .and_then(|v| v.get("score"))
            .is_some_and(Value::is_number);
        if present {
            continue;
        }
        let score = dim
            .aliases()
            .iter()
            .filter_map(|alias| prose_pattern(alias))
            .find_map(|re| re.captures(text).and_then(|c| c.get(1)?.as_str().parse::<f64>().ok()));
        if let Some(score) = score {
            map.insert(
                dim.key().to_string(),
                json!({"score": clamp_score(score), "rationale": ""}),
            );
            found.push(dim.key());
        }
    }

    if found.is_empty() {
        Step::Skipped("no labelled scores found in prose".into())
    } else {
        Step::Applied(format!("read {} from prose", found.join(", ")))
    }
}

fn fill_unscored(candidate: &mut Option<Map<String, Value>>) -> Step {
    let map = candidate.get_or_insert_with(Map::new);
    let mut filled = Vec::new();
    for dim in Dimension::ALL {
        let scored = map
            .get(dim.key())
            .and_then(|v| v.get("score"))
            .is_some_and(|s| !s.is_null());
        if !scored {
            map.insert(
                dim.key().to_string(),
                json!({"score": UNSCORED, "rationale": ""}),
            );
            filled.push(dim.key());
        }
    }
    if filled.is_empty() {
        Step::Skipped("no missing dimensions".into())
    } else {
        Step::Applied(format!("marked {} as {UNSCORED}", filled.join(", ")))
    }
}

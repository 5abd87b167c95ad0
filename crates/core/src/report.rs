//! Fixed-section analysis report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    format::format_timestamp,
    scoring::{Dimension, HookAnalysis},
    state::{Fidelity, SessionState, StateKey},
    types::{BreakdownResult, DegradedNote, MediaDelivery, SearchResults},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    BasicInfo,
    ContentStructure,
    AudienceAttention,
    AudioVisualStrategy,
    ConversionPotential,
    CompetitorInsight,
    Summary,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::BasicInfo,
        SectionKind::ContentStructure,
        SectionKind::AudienceAttention,
        SectionKind::AudioVisualStrategy,
        SectionKind::ConversionPotential,
        SectionKind::CompetitorInsight,
        SectionKind::Summary,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            SectionKind::BasicInfo => "Basic info",
            SectionKind::ContentStructure => "Content structure",
            SectionKind::AudienceAttention => "Audience attention",
            SectionKind::AudioVisualStrategy => "Audio/visual strategy",
            SectionKind::ConversionPotential => "Conversion potential",
            SectionKind::CompetitorInsight => "Competitor insight",
            SectionKind::Summary => "Summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub kind: SectionKind,
    pub title: String,
    pub body: String,
    /// True when the section's source data was absent.
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub sections: Vec<ReportSection>,
    /// Every degradation recorded in the session, verbatim.
    pub notes: Vec<DegradedNote>,
    /// State keys the report would have used but could not find.
    pub missing: Vec<String>,
}

impl Report {
    pub fn section(&self, kind: SectionKind) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportInputs {
    pub breakdown: Option<BreakdownResult>,
    pub hook: Option<HookAnalysis>,
    pub search: Option<SearchResults>,
    pub notes: Vec<DegradedNote>,
}

impl ReportInputs {
    /// Reads inputs from state. Raw hook judgments are ignored.
    pub fn from_state(state: &SessionState) -> Self {
        let hook = match state.fidelity(&StateKey::HookAnalysis) {
            Some(f) if f >= Fidelity::Repaired => state.get_as(&StateKey::HookAnalysis),
            _ => None,
        };
        Self {
            breakdown: state.get_as(&StateKey::BreakdownResult),
            hook,
            search: state.get_as(&StateKey::SearchResults),
            notes: state.notes(),
        }
    }
}

fn placeholder(kind: SectionKind, missing: &[&StateKey]) -> ReportSection {
    let names = missing
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(" and ");
    ReportSection {
        kind,
        title: kind.title().to_string(),
        body: format!("Insufficient data: {names} is not available."),
        placeholder: true,
    }
}

fn section(kind: SectionKind, body: String) -> ReportSection {
    ReportSection {
        kind,
        title: kind.title().to_string(),
        body,
        placeholder: false,
    }
}

fn basic_info(b: &BreakdownResult) -> String {
    let scenes = b.segments.len();
    let avg = if scenes > 0 {
        b.duration / scenes as f64
    } else {
        0.0
    };
    let mut lines = vec![
        format!("Duration: {} ({:.1}s)", format_timestamp(b.duration), b.duration),
        format!("Scenes: {scenes} (average {avg:.1}s per scene)"),
    ];
    lines.push(if b.transcript_available {
        "Speech transcript: available".to_string()
    } else {
        "Speech transcript: none (no audio detected or ASR unavailable)".to_string()
    });
    lines.push(match b.media_delivery {
        MediaDelivery::Remote => "Media delivery: object storage URL".to_string(),
        MediaDelivery::Inline => "Media delivery: inline payload".to_string(),
    });
    lines.join("\n")
}

fn content_structure(b: &BreakdownResult) -> String {
    b.segments
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{}. [{}–{}] {:?} / {:?}, {}: {}",
                i + 1,
                format_timestamp(s.start),
                format_timestamp(s.end),
                s.shot_type,
                s.camera_movement,
                s.tag,
                s.visual_description
                    .as_deref()
                    .unwrap_or("no visual description")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn audience_attention(h: &HookAnalysis) -> String {
    let mut lines = vec![
        format!("Hook score: {:.1}/10 ({})", h.overall(), h.hook_type),
    ];
    for dim in Dimension::ALL {
        let d = h.dimension(dim);
        if d.rationale.is_empty() {
            lines.push(format!("- {}: {:.1}", dim.label(), d.score));
        } else {
            lines.push(format!("- {}: {:.1} ({})", dim.label(), d.score, d.rationale));
        }
    }
    lines.push(format!("Retention prediction: {}", h.retention_prediction));
    lines.join("\n")
}

fn audio_visual(b: &BreakdownResult) -> String {
    let mut shots: BTreeMap<String, usize> = BTreeMap::new();
    let mut moves: BTreeMap<String, usize> = BTreeMap::new();
    for s in &b.segments {
        *shots.entry(format!("{:?}", s.shot_type)).or_default() += 1;
        *moves.entry(format!("{:?}", s.camera_movement)).or_default() += 1;
    }
    let tally = |m: &BTreeMap<String, usize>| {
        m.iter()
            .map(|(k, v)| format!("{k} ×{v}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut lines = vec![
        format!("Shot types: {}", tally(&shots)),
        format!("Camera movement: {}", tally(&moves)),
    ];
    lines.push(match &b.bgm {
        Some(bgm) => {
            let tempo = bgm
                .tempo
                .map(|t| format!(", {t:.0} BPM"))
                .unwrap_or_default();
            format!(
                "Background music: {} / {} ({}){tempo}",
                bgm.style,
                bgm.mood,
                bgm.instruments.join(", ")
            )
        }
        None => "Background music: no profile available".to_string(),
    });
    let voiced = b
        .segments
        .iter()
        .filter(|s| s.audio_description.is_some())
        .count();
    lines.push(if voiced == 0 {
        "Voice-over: no audio detected".to_string()
    } else {
        format!("Voice-over: present in {voiced} of {} scenes", b.segments.len())
    });
    lines.join("\n")
}

fn conversion_potential(h: &HookAnalysis) -> String {
    let list = |title: &str, items: &[String]| {
        if items.is_empty() {
            format!("{title}: none noted")
        } else {
            format!("{title}:\n{}", items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n"))
        }
    };
    [
        list("Strengths", &h.strengths),
        list("Weaknesses", &h.weaknesses),
        list("Suggestions", &h.suggestions),
    ]
    .join("\n")
}

fn competitor_insight(s: &SearchResults) -> String {
    if s.hits.is_empty() {
        return format!("No results for \"{}\".", s.query);
    }
    let mut lines = vec![format!("Search: \"{}\"", s.query)];
    lines.extend(
        s.hits
            .iter()
            .map(|h| format!("- {} ({}): {}", h.title, h.url, h.summary)),
    );
    lines.join("\n")
}

fn summary(b: Option<&BreakdownResult>, h: Option<&HookAnalysis>) -> String {
    let mut parts = Vec::new();
    if let Some(b) = b {
        parts.push(format!(
            "The video runs {:.1}s across {} scenes.",
            b.duration,
            b.segments.len()
        ));
    }
    if let Some(h) = h {
        let weakest = Dimension::ALL
            .into_iter()
            .min_by(|a, c| h.dimension(*a).score.total_cmp(&h.dimension(*c).score))
            .unwrap_or(Dimension::VisualImpact);
        parts.push(format!(
            "Its opening scores {:.1}/10; the weakest dimension is {}.",
            h.overall(),
            weakest.label().to_lowercase()
        ));
    }
    parts.join(" ")
}

/// Builds the report. Every section is always present.
pub fn assemble_report(inputs: &ReportInputs) -> Report {
    let breakdown = inputs.breakdown.as_ref();
    let hook = inputs.hook.as_ref();
    let search = inputs.search.as_ref();

    let sections = SectionKind::ALL
        .into_iter()
        .map(|kind| match kind {
            SectionKind::BasicInfo => breakdown
                .map(|b| section(kind, basic_info(b)))
                .unwrap_or_else(|| placeholder(kind, &[&StateKey::BreakdownResult])),
            SectionKind::ContentStructure => breakdown
                .map(|b| section(kind, content_structure(b)))
                .unwrap_or_else(|| placeholder(kind, &[&StateKey::BreakdownResult])),
            SectionKind::AudienceAttention => hook
                .map(|h| section(kind, audience_attention(h)))
                .unwrap_or_else(|| placeholder(kind, &[&StateKey::HookAnalysis])),
            SectionKind::AudioVisualStrategy => breakdown
                .map(|b| section(kind, audio_visual(b)))
                .unwrap_or_else(|| placeholder(kind, &[&StateKey::BreakdownResult])),
            SectionKind::ConversionPotential => hook
                .map(|h| section(kind, conversion_potential(h)))
                .unwrap_or_else(|| placeholder(kind, &[&StateKey::HookAnalysis])),
            SectionKind::CompetitorInsight => search
                .map(|s| section(kind, competitor_insight(s)))
                .unwrap_or_else(|| placeholder(kind, &[&StateKey::SearchResults])),
            SectionKind::Summary => {
                if breakdown.is_none() && hook.is_none() {
                    placeholder(kind, &[&StateKey::BreakdownResult, &StateKey::HookAnalysis])
                } else {
                    section(kind, summary(breakdown, hook))
                }
            }
        })
        .collect();

    let mut missing = Vec::new();
    if breakdown.is_none() {
        missing.push(StateKey::BreakdownResult.name());
    }
    if hook.is_none() {
        missing.push(StateKey::HookAnalysis.name());
    }
    if search.is_none() {
        missing.push(StateKey::SearchResults.name());
    }

    Report {
        sections,
        notes: inputs.notes.clone(),
        missing,
    }
}

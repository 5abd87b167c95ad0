use std::fmt;

use serde::{Deserialize, Serialize};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    VisualImpact,
    LanguageHook,
    EmotionalArousal,
    InformationDensity,
    RhythmControl,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::VisualImpact,
        Dimension::LanguageHook,
        Dimension::EmotionalArousal,
        Dimension::InformationDensity,
        Dimension::RhythmControl,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Dimension::VisualImpact => "visual_impact",
            Dimension::LanguageHook => "language_hook",
            Dimension::EmotionalArousal => "emotional_arousal",
            Dimension::InformationDensity => "information_density",
            Dimension::RhythmControl => "rhythm_control",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::VisualImpact => "Visual impact",
            Dimension::LanguageHook => "Language hook",
            Dimension::EmotionalArousal => "Emotional arousal",
            Dimension::InformationDensity => "Information density",
            Dimension::RhythmControl => "Rhythm control",
        }
    }

    /// Other names models use for the score, compared after normalization.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Dimension::VisualImpact => &["visual_impact", "visual", "视觉冲击力", "视觉冲击"],
            Dimension::LanguageHook => &["language_hook", "language", "verbal_hook", "语言钩子"],
            Dimension::EmotionalArousal => &[
                "emotional_arousal",
                "emotion_trigger",
                "emotion",
                "emotional_trigger",
                "情绪唤起",
            ],
            Dimension::InformationDensity => &[
                "information_density",
                "info_density",
                "information",
                "信息密度",
            ],
            Dimension::RhythmControl => &["rhythm_control", "rhythm", "pacing", "节奏掌控", "节奏"],
        }
    }

    /// Names of the free-text rationale that accompanies the score.
    pub fn rationale_aliases(&self) -> &'static [&'static str] {
        match self {
            Dimension::VisualImpact => &["visual_impact_rationale", "visual_comment"],
            Dimension::LanguageHook => &["language_hook_rationale", "language_comment"],
            Dimension::EmotionalArousal => &["emotional_arousal_rationale", "emotion_comment"],
            Dimension::InformationDensity => &["information_density_rationale", "info_comment"],
            Dimension::RhythmControl => &["rhythm_control_rationale", "rhythm_comment"],
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    #[serde(default)]
    pub rationale: String,
}

/// Formatted result of scoring the opening seconds of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookAnalysis {
    pub visual_impact: DimensionScore,
    pub language_hook: DimensionScore,
    pub emotional_arousal: DimensionScore,
    pub information_density: DimensionScore,
    pub rhythm_control: DimensionScore,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default = "unknown")]
    pub hook_type: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default = "insufficient_data")]
    pub retention_prediction: String,
}

fn unknown() -> String {
    "unknown".into()
}

fn insufficient_data() -> String {
    "insufficient data for a stable prediction".into()
}

impl HookAnalysis {
    pub fn dimension(&self, dimension: Dimension) -> &DimensionScore {
        match dimension {
            Dimension::VisualImpact => &self.visual_impact,
            Dimension::LanguageHook => &self.language_hook,
            Dimension::EmotionalArousal => &self.emotional_arousal,
            Dimension::InformationDensity => &self.information_density,
            Dimension::RhythmControl => &self.rhythm_control,
        }
    }

    /// Reported overall score, or the mean of the five dimensions.
    pub fn overall(&self) -> f64 {
        self.overall_score.unwrap_or_else(|| {
            Dimension::ALL
                .iter()
                .map(|d| self.dimension(*d).score)
                .sum::<f64>()
                / Dimension::ALL.len() as f64
        })
    }

    /// Dimensions whose score falls outside the policy range.
    pub fn out_of_range(&self) -> Vec<Dimension> {
        Dimension::ALL
            .into_iter()
            .filter(|d| {
                let s = self.dimension(*d).score;
                !s.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(&s)
            })
            .collect()
    }
}

use crate::{
    report::Report,
    scoring::{Dimension, HookAnalysis},
    types::{BreakdownResult, SearchResults},
};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

pub fn format_breakdown_markdown(breakdown: &BreakdownResult) -> String {
    let mut output = String::new();
    output.push_str("## Scene breakdown\n\n");
    output.push_str(&format!(
        "**Duration:** {:.1}s | **Scenes:** {} | **Transcript:** {}\n\n",
        breakdown.duration,
        breakdown.segments.len(),
        if breakdown.transcript_available {
            "yes"
        } else {
            "no"
        }
    ));

    for (i, seg) in breakdown.segments.iter().enumerate() {
        output.push_str(&format!(
            "### {}. [{}–{}] {}\n\n",
            i + 1,
            format_timestamp(seg.start),
            format_timestamp(seg.end),
            seg.tag
        ));
        output.push_str(&format!(
            "*{:?}, {:?}*\n\n",
            seg.shot_type, seg.camera_movement
        ));
        if let Some(visual) = &seg.visual_description {
            output.push_str(&format!("{}\n\n", visual));
        }
        if let Some(audio) = &seg.audio_description {
            output.push_str(&format!("> {}\n\n", audio));
        }
    }

    if let Some(bgm) = &breakdown.bgm {
        output.push_str(&format!(
            "**BGM:** {} / {} ({})\n",
            bgm.style,
            bgm.mood,
            bgm.instruments.join(", ")
        ));
    }

    output
}

pub fn format_hook_markdown(analysis: &HookAnalysis) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "## Hook analysis: {:.1}/10\n\n**Type:** {}\n\n",
        analysis.overall(),
        analysis.hook_type
    ));

    output.push_str("| Dimension | Score | Notes |\n|---|---|---|\n");
    for dim in Dimension::ALL {
        let score = analysis.dimension(dim);
        output.push_str(&format!(
            "| {} | {:.1} | {} |\n",
            dim.label(),
            score.score,
            score.rationale
        ));
    }
    output.push('\n');

    for (title, items) in [
        ("Strengths", &analysis.strengths),
        ("Weaknesses", &analysis.weaknesses),
        ("Suggestions", &analysis.suggestions),
    ] {
        if items.is_empty() {
            continue;
        }
        output.push_str(&format!("### {}\n\n", title));
        for item in items {
            output.push_str(&format!("• {}\n", item));
        }
        output.push('\n');
    }

    output.push_str(&format!(
        "**Retention prediction:** {}\n",
        analysis.retention_prediction
    ));
    output
}

pub fn format_search_markdown(results: &SearchResults) -> String {
    let mut output = format!("## Search: {}\n\n", results.query);
    if results.hits.is_empty() {
        output.push_str("No results.\n");
    }
    for hit in &results.hits {
        output.push_str(&format!("• [{}]({}) {}\n", hit.title, hit.url, hit.summary));
    }
    output
}

pub fn format_report_markdown(report: &Report) -> String {
    let mut output = String::new();
    output.push_str("# Video analysis report\n\n");

    for section in &report.sections {
        output.push_str(&format!("## {}\n\n", section.title));
        output.push_str(&section.body);
        output.push_str("\n\n");
    }

    if !report.missing.is_empty() {
        output.push_str(&format!(
            "**Missing artifacts:** {}\n\n",
            report.missing.join(", ")
        ));
    }

    if !report.notes.is_empty() {
        output.push_str("## Notes\n\n");
        for note in &report.notes {
            output.push_str(&format!("• [{}] {}\n", note.stage, note.reason));
        }
        output.push('\n');
    }

    output
}

//! Markdown report generation.
//!
//! This module renders a batch recommendation as a Markdown or JSON report
//! for the `predict` command.

use crate::models::BatchResponse;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A recommendation plus the context it was produced in.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    /// Where predictions came from (model artifact path or server URL).
    pub source: String,
    /// The aggregated recommendation.
    #[serde(flatten)]
    pub response: BatchResponse,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Crop Recommendation Report\n\n");
    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_recommendation_section(&report.response));
    output.push_str(&generate_votes_section(&report.response));
    output.push_str(&generate_samples_section(&report.response));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Source:** `{}`\n", report.source));
    section.push_str(&format!(
        "- **Feature Schema:** {} ({})\n",
        report.response.schema_version,
        report.response.features_order.join(", ")
    ));
    section.push('\n');

    section
}

fn generate_recommendation_section(response: &BatchResponse) -> String {
    let mut section = String::new();

    section.push_str("## Recommendation\n\n");
    section.push_str("| Recommended Crop | Confidence (majority vote) | Samples |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| **{}** | {} | {} |\n\n",
        response.recommended_crop.to_uppercase(),
        percent(response.confidence),
        response.total_samples
    ));

    section
}

fn generate_votes_section(response: &BatchResponse) -> String {
    let mut section = String::new();

    section.push_str("## Vote Details\n\n");
    section.push_str("| Crop | Votes | Share |\n");
    section.push_str("|:---|:---:|:---:|\n");

    for (crop, votes) in response.vote_details.ranked() {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            crop,
            votes,
            percent(response.vote_share(crop))
        ));
    }
    section.push('\n');

    section
}

fn generate_samples_section(response: &BatchResponse) -> String {
    let mut section = String::new();

    section.push_str("## Per-Sample Predictions\n\n");
    section.push_str("| Sample | Prediction | Agrees |\n");
    section.push_str("|:---|:---|:---:|\n");

    for (i, prediction) in response.all_predictions.iter().enumerate() {
        let agrees = if *prediction == response.recommended_crop {
            "✅"
        } else {
            ""
        };
        section.push_str(&format!("| Sample {} | {} | {} |\n", i + 1, prediction, agrees));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by crop-advisor*\n".to_string()
}

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

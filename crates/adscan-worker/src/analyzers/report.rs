//! HTML report rendering.

use std::fmt::Write as _;

use async_trait::async_trait;

use adscan_models::AnalysisResult;

use super::ReportRenderer;
use crate::error::{StageError, StageResult};

/// Self-contained HTML page summarizing an [`AnalysisResult`].
#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer;

impl HtmlReportRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render_html(&self, result: &AnalysisResult) -> Result<String, std::fmt::Error> {
        let verdict = if result.has_advertising {
            "Advertising detected"
        } else {
            "No advertising detected"
        };

        let mut html = String::with_capacity(4096);
        writeln!(html, "<!DOCTYPE html>")?;
        writeln!(html, "<html lang=\"en\"><head><meta charset=\"utf-8\">")?;
        writeln!(html, "<title>Ad analysis {}</title>", escape(result.job_id.as_str()))?;
        writeln!(
            html,
            "<style>body{{font-family:sans-serif;max-width:52rem;margin:2rem auto}}\
             table{{border-collapse:collapse}}td,th{{border:1px solid #ccc;padding:.3rem .6rem}}\
             .yes{{color:#b00020}}.no{{color:#1b5e20}}</style>"
        )?;
        writeln!(html, "</head><body>")?;
        writeln!(html, "<h1>Ad analysis report</h1>")?;
        writeln!(
            html,
            "<p>Job <code>{}</code> &middot; {} &middot; analyzed {}</p>",
            escape(result.job_id.as_str()),
            escape(result.platform.as_str()),
            result.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            html,
            "<h2 class=\"{}\">{} (confidence {:.2})</h2>",
            if result.has_advertising { "yes" } else { "no" },
            verdict,
            result.confidence_score
        )?;

        writeln!(html, "<h3>Scores</h3><table><tr><th>Component</th><th>Score</th></tr>")?;
        let scores = result.component_scores();
        for (name, score) in [
            ("Visual", scores.visual),
            ("Audio", scores.audio),
            ("Text", scores.text),
            ("Disclosure", scores.disclosure),
        ] {
            writeln!(html, "<tr><td>{name}</td><td>{score:.2}</td></tr>")?;
        }
        writeln!(html, "</table>")?;

        writeln!(html, "<h3>Detected brands</h3>")?;
        if result.detected_brands.is_empty() {
            writeln!(html, "<p>None ({} frames analyzed)</p>", result.frames_analyzed)?;
        } else {
            writeln!(html, "<table><tr><th>Brand</th><th>Confidence</th><th>Seen at (s)</th></tr>")?;
            for brand in &result.detected_brands {
                let times: Vec<String> = brand.timestamps.iter().map(|t| format!("{t:.1}")).collect();
                writeln!(
                    html,
                    "<tr><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
                    escape(&brand.name),
                    brand.confidence,
                    times.join(", ")
                )?;
            }
            writeln!(html, "</table>")?;
        }

        write_list(&mut html, "Keywords", result.detected_keywords.iter())?;
        write_list(&mut html, "Disclosure markers", result.disclosure_markers.iter())?;

        writeln!(html, "<h3>Transcript</h3>")?;
        writeln!(html, "<blockquote>{}</blockquote>", escape(&result.transcript))?;
        writeln!(html, "</body></html>")?;
        Ok(html)
    }
}

fn write_list<'a>(html: &mut String, title: &str, items: impl Iterator<Item = &'a String>) -> std::fmt::Result {
    writeln!(html, "<h3>{title}</h3><ul>")?;
    let mut any = false;
    for item in items {
        any = true;
        writeln!(html, "<li>{}</li>", escape(item))?;
    }
    if !any {
        writeln!(html, "<li>None</li>")?;
    }
    writeln!(html, "</ul>")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl ReportRenderer for HtmlReportRenderer {
    async fn render(&self, result: &AnalysisResult) -> StageResult<String> {
        self.render_html(result)
            .map_err(|e| StageError::permanent(format!("report rendering failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adscan_models::{DetectedBrand, JobId, Platform};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn result() -> AnalysisResult {
        AnalysisResult {
            job_id: JobId::from_string("job-1"),
            platform: Platform::Youtube,
            visual_score: 0.8,
            audio_score: 0.5,
            text_score: 0.33,
            disclosure_score: 0.0,
            confidence_score: 0.55,
            has_advertising: true,
            detected_brands: vec![DetectedBrand::new("Acme <Corp>", 0.9, 12.0)],
            detected_keywords: BTreeSet::from(["промокод".to_string()]),
            transcript: "Используйте промокод & <script>".to_string(),
            disclosure_markers: BTreeSet::new(),
            frames_analyzed: 10,
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_render_contains_findings_and_escapes() {
        let html = HtmlReportRenderer::new().render(&result()).await.unwrap();

        assert!(html.contains("Advertising detected"));
        assert!(html.contains("Acme &lt;Corp&gt;"));
        assert!(html.contains("<li>промокод</li>"));
        assert!(html.contains("&amp; &lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("12.0"));
    }
}

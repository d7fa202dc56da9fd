//! Markdown export of a run report

use crate::output::report::RunReport;
use crate::output::stats::UrlOutcome;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the report as markdown to `output_path`
pub fn write_markdown_report(report: &RunReport, output_path: &Path) -> std::io::Result<()> {
    let markdown = format_markdown_report(report);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a report as markdown
pub fn format_markdown_report(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str("# Gleaner Crawl Report\n\n");

    md.push_str("## Run\n\n");
    md.push_str(&format!("- **State**: {}\n", report.state));
    md.push_str(&format!("- **Reason**: {}\n", report.end_reason()));
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    md.push_str(&format!("- **Finished**: {}\n", report.finished_at.to_rfc3339()));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds\n",
        report.duration().as_secs_f64()
    ));
    md.push_str(&format!(
        "- **Resumed**: {}\n\n",
        if report.resumed { "yes" } else { "no" }
    ));

    md.push_str("## Statistics\n\n");
    md.push_str("| Metric | Count |\n");
    md.push_str("|--------|-------|\n");
    let stats = &report.stats;
    for (label, value) in [
        ("Pages fetched", stats.pages_fetched),
        ("Pages failed", stats.pages_failed),
        ("Retries scheduled", stats.retries_scheduled),
        ("Links discovered", stats.links_discovered),
        ("Links enqueued", stats.links_enqueued),
        ("Links denied", stats.links_denied),
        ("Links out of scope", stats.links_out_of_scope),
        ("Links too deep", stats.links_too_deep),
        ("Links over budget", stats.links_over_budget),
    ] {
        md.push_str(&format!("| {} | {} |\n", label, value));
    }
    md.push('\n');

    if report.errors.total > 0 {
        md.push_str("## Errors by Category\n\n");
        md.push_str("| Category | Count |\n");
        md.push_str("|----------|-------|\n");
        for (category, count) in report.errors.by_category() {
            md.push_str(&format!("| {} | {} |\n", category, count));
        }
        md.push('\n');
    }

    if !report.outcomes.is_empty() {
        md.push_str("## URLs\n\n");
        md.push_str("| URL | Result | Attempts | Detail |\n");
        md.push_str("|-----|--------|----------|--------|\n");
        for outcome in &report.outcomes {
            let (result, detail) = match outcome {
                UrlOutcome::Success {
                    title, links_found, ..
                } => (
                    "ok".to_string(),
                    format!(
                        "{} ({} links)",
                        escape_cell(title.as_deref().unwrap_or("untitled")),
                        links_found
                    ),
                ),
                UrlOutcome::Failure {
                    category, message, ..
                } => (category.to_string(), escape_cell(message)),
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                outcome.url(),
                result,
                outcome.attempts(),
                detail
            ));
        }
        md.push('\n');
    }

    if !report.unprocessed.is_empty() {
        md.push_str(&format!(
            "## Unprocessed URLs ({})\n\n",
            report.unprocessed.len()
        ));
        for url in &report.unprocessed {
            md.push_str(&format!("- {}\n", url));
        }
        md.push('\n');
    }

    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

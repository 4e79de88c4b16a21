use anyhow::Result;
use console::style;
use std::fmt::Write;

use crate::catalog::CatalogStats;
use crate::cli::OutputFormat;
use crate::models::Item;
use crate::orchestrator::RunReport;
use crate::utils::format_file_size;

/// Counts per outcome for one stage run
pub fn format_run_summary(report: &RunReport) -> String {
    let snapshot = &report.snapshot;
    let mut out = String::new();

    let title = if report.cancelled {
        format!("Stage {} interrupted", report.stage)
    } else {
        format!("Stage {} finished", report.stage)
    };
    let _ = writeln!(out, "{}", style(title).bold());
    let _ = writeln!(out, "  processed:    {}", snapshot.processed);
    let _ = writeln!(out, "  succeeded:    {}", style(snapshot.succeeded).green());
    let _ = writeln!(out, "  failed:       {}", style(snapshot.failed).red());
    let _ = writeln!(out, "  needs review: {}", style(snapshot.needs_review).yellow());
    let _ = writeln!(out, "  skipped:      {}", snapshot.skipped);
    for (platform, count) in &snapshot.by_platform {
        let _ = writeln!(out, "    {:<12}{}", platform, count);
    }

    let checkpoint = &report.checkpoint;
    if checkpoint.processed_count > snapshot.processed {
        let _ = writeln!(
            out,
            "  all sessions: {} processed, {} succeeded, {} failed, {} for review",
            checkpoint.processed_count, checkpoint.success_count, checkpoint.failure_count, checkpoint.review_count
        );
    }
    if report.cancelled {
        let _ = writeln!(out, "  re-run the same command to continue");
    }
    out
}

pub fn format_stats(stats: &CatalogStats, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(stats)?),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "{} {}", style("Items:").bold(), stats.total);
            let _ = writeln!(out, "{}", style("By status:").bold());
            for (status, count) in &stats.by_status {
                let _ = writeln!(out, "  {:<13}{}", status, count);
            }
            let _ = writeln!(out, "{}", style("By platform:").bold());
            for (platform, count) in &stats.by_platform {
                let _ = writeln!(out, "  {:<13}{}", platform, count);
            }
            let _ = writeln!(out, "{} {}", style("Needs review:").bold(), stats.needs_review);
            Ok(out)
        }
    }
}

/// Failed items with the reason recorded for each
pub fn format_failed(items: &[Item]) -> String {
    if items.is_empty() {
        return "No failed items\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{} failed item(s):", items.len());
    for item in items {
        let from = item.failed_from.map(|s| s.as_str()).unwrap_or("unknown");
        let _ = writeln!(
            out,
            "  {} [{}, {} attempt(s)] {}",
            style(&item.id).bold(),
            from,
            item.attempt_count,
            item.source_url
        );
        let _ = writeln!(
            out,
            "      {}",
            style(item.failure_reason.as_deref().unwrap_or("no reason recorded")).red()
        );
        if let Some(size) = item.media_size {
            let _ = writeln!(out, "      media: {}", format_file_size(size));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;

    #[test]
    fn test_stats_as_json() {
        let mut stats = CatalogStats {
            total: 3,
            needs_review: 1,
            ..Default::default()
        };
        stats.by_status.insert("unresolved".into(), 2);
        stats.by_status.insert("stored".into(), 1);

        let json: serde_json::Value = serde_json::from_str(&format_stats(&stats, &OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["by_status"]["unresolved"], 2);
        assert_eq!(json["needs_review"], 1);
    }

    #[test]
    fn test_stats_as_text() {
        let mut stats = CatalogStats {
            total: 2,
            ..Default::default()
        };
        stats.by_platform.insert("youtube".into(), 2);
        let text = console::strip_ansi_codes(&format_stats(&stats, &OutputFormat::Text).unwrap()).to_string();
        assert!(text.contains("Items: 2"));
        assert!(text.contains("youtube"));
    }

    #[test]
    fn test_failed_listing_shows_reasons() {
        let mut item = Item::new("0009", "https://school.example/lesson/9");
        item.status = ItemStatus::Failed;
        item.failed_from = Some(ItemStatus::Resolved);
        item.attempt_count = 3;
        item.failure_reason = Some("Not found: video removed".into());

        let text = console::strip_ansi_codes(&format_failed(&[item])).to_string();
        assert!(text.contains("1 failed item(s)"));
        assert!(text.contains("0009 [resolved, 3 attempt(s)]"));
        assert!(text.contains("Not found: video removed"));
        assert_eq!(format_failed(&[]), "No failed items\n");
    }
}

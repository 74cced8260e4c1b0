//! Report renderers
//!
//! The compact status line, the structured JSON summary and the
//! human-readable text report are all derived from the same
//! [`PipelineReport`] data, differing only in verbosity.

use crate::pipeline::PipelineReport;
use std::fmt::Write as _;

/// Compact single-line status
#[must_use]
pub fn compact_line(report: &PipelineReport) -> String {
    report.compact.clone()
}

/// Structured JSON summary
#[must_use]
pub fn json_summary(report: &PipelineReport) -> serde_json::Value {
    serde_json::json!({
        "status": report.snapshot.status,
        "compact": report.compact,
        "total": report.total,
        "failed": report.snapshot.failed_count(),
        "unique_failures": report.dedup.unique_count,
        "deduplication_ratio": report.dedup.deduplication_ratio,
        "categories": report.snapshot.categories,
        "fixable": report.snapshot.fixable_count,
        "analyses": report.analyses.iter().map(|analysis| {
            serde_json::json!({
                "root_cause": analysis.root_cause,
                "category": analysis.pattern.category,
                "confidence": analysis.confidence,
                "evidence": analysis.evidence,
                "suggested_fixes": analysis.suggested_fixes,
            })
        }).collect::<Vec<_>>(),
        "fixes": report.fixes.iter().map(|fix| {
            serde_json::json!({
                "file": fix.file,
                "template": fix.template_id,
                "changes": fix.change_count(),
                "manual_steps": fix.manual_steps,
            })
        }).collect::<Vec<_>>(),
        "diff": report.diff,
        "novelty": report.novelty,
    })
}

/// Human-readable text report with tables and a category trend
#[must_use]
pub fn text_report(report: &PipelineReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Triage Report");
    let _ = writeln!(out, "=============");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Status: {}   Tests: {}   Failed: {}   Unique: {}   Auto-fixable: {}",
        report.snapshot.status,
        report.total,
        report.snapshot.failed_count(),
        report.dedup.unique_count,
        report.snapshot.fixable_count,
    );
    let _ = writeln!(out);

    if !report.snapshot.categories.is_empty() {
        let _ = writeln!(out, "Failures by category");
        for (category, tally) in &report.snapshot.categories {
            let _ = writeln!(
                out,
                "  {category:<20} {:>3}  {}",
                tally.count,
                "#".repeat(tally.count.min(40))
            );
        }
        let _ = writeln!(out);
    }

    if !report.analyses.is_empty() {
        let _ = writeln!(out, "Root causes");
        let _ = writeln!(
            out,
            "  {:<32} {:<18} {:>6}  {}",
            "test", "category", "conf", "root cause"
        );
        for analysis in &report.analyses {
            let name: String = report
                .dedup
                .unique
                .iter()
                .find(|u| u.error == analysis.error)
                .map(|u| u.name.clone())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<32} {:<18} {:>5.0}%  {}",
                truncate(&name, 32),
                analysis.pattern.category,
                analysis.confidence * 100.0,
                truncate(&analysis.root_cause, 60),
            );
        }
        let _ = writeln!(out);
    }

    if !report.fixes.is_empty() {
        let _ = writeln!(out, "Generated fixes");
        for fix in &report.fixes {
            let _ = writeln!(
                out,
                "  {} ({}, {} change{})",
                fix.file.display(),
                fix.template_id,
                fix.change_count(),
                if fix.change_count() == 1 { "" } else { "s" }
            );
            for step in &fix.manual_steps {
                let _ = writeln!(out, "    manual: {step}");
            }
        }
        let _ = writeln!(out);
    }

    if report.diff.unchanged {
        let _ = writeln!(out, "No change since the previous run.");
    } else {
        if let Some((from, to)) = &report.diff.status_transition {
            let _ = writeln!(out, "Status transition: {from} -> {to}");
        }
        if !report.diff.fixed_tests.is_empty() {
            let _ = writeln!(out, "Fixed since last run:");
            for name in &report.diff.fixed_tests {
                let _ = writeln!(out, "  + {name}");
            }
        }
        if !report.diff.new_failures.is_empty() {
            let _ = writeln!(out, "New failures:");
            for name in &report.diff.new_failures {
                let _ = writeln!(out, "  - {name}");
            }
        }
    }

    if let Some(novelty) = &report.novelty {
        if novelty.unchanged {
            let _ = writeln!(out, "Session: report unchanged, suppressed.");
        } else {
            let _ = writeln!(
                out,
                "Session: {} new item(s), {} already known.",
                novelty.new_patterns.len()
                    + novelty.new_files.len()
                    + novelty.new_root_causes.len()
                    + novelty.new_fixes.len()
                    + novelty.new_fingerprints.len(),
                novelty.already_known,
            );
        }
    }

    out
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        format!("{}…", &text[..text.char_indices().take(limit - 1).last().map_or(0, |(i, c)| i + c.len_utf8())])
    }
}

//! Text summary builder for CLI output.
//!
//! This module computes session metrics and formats human-readable lines for text mode.

use crate::metrics;
use crate::model::{FleetReport, SubscriberOutcome, SubscriberReport};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn outcome_label(outcome: Option<SubscriberOutcome>) -> &'static str {
    match outcome {
        Some(SubscriberOutcome::Stopped) => "stopped",
        Some(SubscriberOutcome::Completed) => "completed",
        Some(SubscriberOutcome::Failed) => "FAILED",
        Some(SubscriberOutcome::Unclean) => "UNCLEAN",
        None => "not started",
    }
}

fn subscriber_line(s: &SubscriberReport) -> String {
    let mut line = format!(
        "UE {}: {}, {} session(s)",
        s.imsi,
        outcome_label(s.outcome),
        s.sessions
    );
    if let Some((mean, median, p25, p75)) = metrics::compute_metrics(&s.connected_secs) {
        line.push_str(&format!(
            ", connected avg {mean:.1}s med {median:.1}s p25 {p25:.1}s p75 {p75:.1}s"
        ));
    }
    let mut issues = Vec::new();
    if s.spawn_failures > 0 {
        issues.push(format!("{} spawn failure(s)", s.spawn_failures));
    }
    if s.control_failures > 0 {
        issues.push(format!("{} failed deregistration(s)", s.control_failures));
    }
    if s.forced_kills > 0 {
        issues.push(format!("{} forced kill(s)", s.forced_kills));
    }
    if !issues.is_empty() {
        line.push_str(&format!(" ({})", issues.join(", ")));
    }
    line
}

/// Build a text summary from the fleet report.
pub(crate) fn build_text_summary(report: &FleetReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "Fleet run: {} to {}{}",
        report.started_utc,
        report.finished_utc,
        if report.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    ));

    let sessions: u32 = report.subscribers.iter().map(|s| s.sessions).sum();
    let failed = report
        .subscribers
        .iter()
        .filter(|s| s.outcome == Some(SubscriberOutcome::Failed))
        .count();
    lines.push(format!(
        "Subscribers: {}, sessions: {}, permanently failed: {}",
        report.subscribers.len(),
        sessions,
        failed
    ));

    for s in &report.subscribers {
        lines.push(subscriber_line(s));
    }

    let unclean: Vec<&str> = report.unclean().map(|s| s.imsi.as_str()).collect();
    if !unclean.is_empty() {
        lines.push(format!("Did not shut down cleanly: {}", unclean.join(", ")));
    }

    TextSummary { lines }
}

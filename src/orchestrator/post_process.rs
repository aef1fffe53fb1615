//! Post-run processing utilities.
//!
//! Handles exports of the fleet report after the coordinator returns.

use crate::cli::Cli;
use crate::model::FleetReport;
use crate::storage;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedReport {
    pub export_messages: Vec<String>,
}

/// Export the report where requested. Failures are reported, not raised.
pub(crate) fn process_fleet_report(args: &Cli, report: &FleetReport) -> ProcessedReport {
    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    ProcessedReport { export_messages }
}

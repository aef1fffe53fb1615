use crate::model::FleetReport;
use anyhow::{Context, Result};
use std::path::Path;

/// Write the report as pretty-printed JSON, creating parent directories as needed.
pub fn export_json(path: &Path, report: &FleetReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

use crate::forensic::paths::CaseLayout;
use crate::forensic::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(layout: &CaseLayout, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&layout.logs_dir)
        .with_context(|| format!("failed to create {}", layout.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = layout.logs_dir.join("audit.log");
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit failures never fail the command; they are logged and dropped.
pub fn record(layout: &CaseLayout, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(layout, phase, status, message) {
        log::warn!("audit append failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_as_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CaseLayout::new(dir.path());
        append_event(&layout, "analyze", "ok", "7 segments").expect("first");
        append_event(&layout, "summarize", "error", "final call failed").expect("second");

        let raw = fs::read_to_string(layout.logs_dir.join("audit.log")).expect("read log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json line");
        assert_eq!(second["phase"], "summarize");
        assert_eq!(second["status"], "error");
    }
}

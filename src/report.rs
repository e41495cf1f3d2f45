//! YAML diagnostic reports.
//!
//! When diffing or generation fails, the schemas and statements involved
//! are bundled into a YAML file so the operator can attach full context
//! to a bug report instead of reconstructing it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize)]
pub struct DiagnosticReport {
    pub phase: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_schema: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub statements: Vec<String>,
}

impl DiagnosticReport {
    pub fn new(phase: &str, error: impl ToString) -> DiagnosticReport {
        DiagnosticReport {
            phase: phase.to_string(),
            error: error.to_string(),
            ..DiagnosticReport::default()
        }
    }

    /// Writes the report next to the system temp dir and returns the
    /// path for the error message.
    pub fn write(&self) -> Result<PathBuf> {
        let yaml = serde_yaml::to_string(self).context("could not serialize diagnostics")?;
        let mut file = tempfile::Builder::new()
            .prefix("scurry-diagnostic-")
            .suffix(".yaml")
            .tempfile()
            .context("could not create diagnostics file")?;
        file.write_all(yaml.as_bytes())
            .context("could not write diagnostics file")?;
        let (_, path) = file.keep().context("could not persist diagnostics file")?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_written_and_kept() {
        let mut report = DiagnosticReport::new("diff", "boom");
        report.local_schema = Some("CREATE TABLE a (x INT);".to_string());
        report.statements = vec!["CREATE TABLE a (x INT)".to_string()];
        let path = report.write().unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("phase: diff"));
        assert!(raw.contains("CREATE TABLE a"));
        std::fs::remove_file(path).ok();
    }
}

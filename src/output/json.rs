//! JSON result report.

use super::ScanReport;

/// Render the report as pretty JSON with a trailing newline.
pub fn render(report: &ScanReport) -> String {
    let mut json = serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());
    json.push('\n');
    json
}

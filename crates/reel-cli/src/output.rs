//! Output formatting for CLI

use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Format a report. `rows` feed the table format; text falls back to the
/// caller's rendering.
pub fn format_output<T, R>(data: &T, rows: &[R], format: &str, text: impl FnOnce() -> String) -> String
where
    T: Serialize,
    R: Tabled,
{
    match OutputFormat::from(format) {
        OutputFormat::Json => serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Table => Table::new(rows).to_string(),
        OutputFormat::Text => text(),
    }
}

//! Export formats shared by the metric, alert and error buffers
//!
//! Structured exports are pretty-printed JSON documents that carry the buffer
//! plus derived statistics. Tabular exports are CSV with one row per record.

use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output format for buffer exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// JSON document with records and statistics
    #[default]
    Structured,
    /// CSV with one row per record
    Tabular,
}

/// A record that can be written as one CSV row
pub trait TabularRow {
    /// Column names, in row order
    fn header() -> &'static [&'static str];

    /// Field values, in header order
    fn row(&self) -> Vec<String>;
}

/// Serialize a document as pretty JSON
pub fn to_structured<T: Serialize>(document: &T) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// Render records as CSV with a header line
pub fn to_table<'a, R, I>(rows: I) -> String
where
    R: TabularRow + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut out = String::new();
    push_line(&mut out, R::header().iter().map(|h| h.to_string()));
    for record in rows {
        push_line(&mut out, record.row());
    }
    out
}

/// Write an export to disk
pub fn write_export(path: &Path, contents: &str) -> Result<(), ExportError> {
    std::fs::write(path, contents)?;
    Ok(())
}

fn push_line<I: IntoIterator<Item = String>>(out: &mut String, fields: I) {
    let line: Vec<String> = fields.into_iter().map(|f| escape_field(&f)).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Parse CSV produced by [`to_table`] back into rows of fields
///
/// The header line is returned as the first row.
pub fn parse_table(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Render an optional value as an empty cell when missing
pub(crate) fn cell<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

//! Output formatting utilities

use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

use driftless_provider::Warnings;

/// Output format
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Print a single observed snapshot
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let value = serde_json::to_value(item)?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Field", "Value"]);

            if let Value::Object(fields) = value {
                for (field, value) in fields {
                    table.add_row(vec![Cell::new(field), Cell::new(cell_text(&value))]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(item)?);
        }
    }
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "-".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Print warnings collected during a convergence to stderr
pub fn print_warnings(warnings: &Warnings) {
    for warning in warnings.iter() {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

/// Print success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!(null)), "-");
        assert_eq!(cell_text(&json!("ENABLED")), "ENABLED");
        assert_eq!(cell_text(&json!(42)), "42");
        assert_eq!(cell_text(&json!([])), "-");
        assert_eq!(cell_text(&json!(["a", "b"])), "a\nb");
        assert_eq!(cell_text(&json!([{"id": 1}])), "{\"id\":1}");
    }
}

use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Command output that can be printed in every [`OutputFormat`].
pub trait Render: Serialize {
    fn title(&self) -> &'static str;

    /// Scalar fields, in display order.
    fn fields(&self) -> Vec<(&'static str, String)>;

    /// Optional table of repeated items: headers, then rows.
    fn rows(&self) -> Option<(Vec<&'static str>, Vec<Vec<String>>)> {
        None
    }
}

pub fn emit<R: Render>(value: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let fields = value.fields();
            if !fields.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec![value.title().to_uppercase(), String::new()]);
                for (name, field) in fields {
                    table.add_row(vec![name.to_string(), field]);
                }
                println!("{table}");
            }
            if let Some((headers, rows)) = value.rows() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(headers);
                for row in rows {
                    table.add_row(row);
                }
                println!("{table}");
            }
        }
        OutputFormat::Pretty => {
            println!("{}:", value.title());
            let fields = value.fields();
            let width = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            for (name, field) in fields {
                println!("  {:<width$}  {}", format!("{name}:"), field, width = width + 1);
            }
            if let Some((headers, rows)) = value.rows() {
                println!("  {}", headers.join("  "));
                for row in rows {
                    println!("  {}", row.join("  "));
                }
            }
        }
    }
}

/// Grams with the scale's display precision.
pub fn grams(value: f64) -> String {
    format!("{value:.4} g")
}

//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use uuid::Uuid;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows, or the raw items as JSON
pub fn print_table<R: Tabled, T: Serialize>(rows: &[R], items: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(items),
    }
}

pub fn print_json<T: Serialize + ?Sized>(item: &T) {
    if let Ok(json) = serde_json::to_string_pretty(item) {
        println!("{}", json);
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// First block of a UUID, enough to tell rows apart
pub fn short_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_optional_time(time: Option<&DateTime<Utc>>) -> String {
    time.map(format_time).unwrap_or_else(|| "-".to_string())
}

/// Color a lifecycle or health state
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "pending" | "recommended" => status.yellow().to_string(),
        "ongoing" | "cancelling" => status.blue().to_string(),
        "succeeded" | "healthy" => status.green().to_string(),
        "suspended" | "superseded" | "cancelled" | "degraded" => status.dimmed().to_string(),
        "failed" | "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}

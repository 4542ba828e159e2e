//! Output formatting for ota-cli (table, json)

use std::time::Duration;

use clap::ValueEnum;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use ota_client::ArtifactMetadata;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Human-oriented messages are suppressed in quiet and JSON mode
    fn chatty(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Table
    }

    /// Print a success message
    pub fn success(&self, msg: &str) {
        if self.chatty() {
            println!("{}", msg.green());
        }
    }

    /// Print an info message
    pub fn info(&self, msg: &str) {
        if self.chatty() {
            println!("{}", msg);
        }
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => print_json(&data),
        }
    }

    /// Print key-value pairs (for info-style commands)
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_lowercase().replace(' ', "_"), v.clone().into()))
                    .collect();
                print_json(&map);
            }
        }
    }

    /// Print a serializable value as JSON regardless of format
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        print_json(value);
    }

    /// Spinner for long transfers; hidden unless chatty
    pub fn spinner(&self, msg: &str) -> ProgressBar {
        if !self.chatty() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render JSON: {}", e),
    }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

// =============================================================================
// Display types
// =============================================================================

/// Firmware display for list command
#[derive(Debug, Tabled, Serialize)]
pub struct FirmwareRow {
    #[tabled(rename = "Device Type")]
    pub device_type: String,
    #[tabled(rename = "Version")]
    pub version: String,
    #[tabled(rename = "File")]
    pub filename: String,
    #[tabled(rename = "Size")]
    pub size: String,
    #[tabled(rename = "Digest")]
    pub digest: String,
    #[tabled(rename = "Uploaded")]
    pub uploaded_at: String,
}

impl From<&ArtifactMetadata> for FirmwareRow {
    fn from(meta: &ArtifactMetadata) -> Self {
        Self {
            device_type: meta.device_type.clone(),
            version: meta.version.to_string(),
            filename: meta.filename.clone(),
            size: format_size(meta.size_bytes),
            digest: meta.digest.chars().take(12).collect(),
            uploaded_at: meta.uploaded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Key-value view of one artifact
pub fn metadata_pairs(meta: &ArtifactMetadata) -> Vec<(&'static str, String)> {
    vec![
        ("Device Type", meta.device_type.clone()),
        ("Version", meta.version.to_string()),
        ("Filename", meta.filename.clone()),
        ("Size", meta.size_bytes.to_string()),
        ("Digest", meta.digest.clone()),
        ("Uploaded", meta.uploaded_at.to_rfc3339()),
        (
            "Notes",
            if meta.notes.is_empty() {
                "-".to_string()
            } else {
                meta.notes.clone()
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(104_857_600), "100.0 MiB");
    }
}

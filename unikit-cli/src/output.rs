use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};
use unikit_core::InstanceState;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

pub trait OutputFormatter {
    fn format<T: Serialize>(&self, data: T) -> String;
    fn format_table<T: Tabled + Serialize>(&self, data: Vec<T>) -> String;
}

impl OutputFormatter for OutputFormat {
    fn format<T: Serialize>(&self, data: T) -> String {
        match self {
            OutputFormat::Table | OutputFormat::Json => {
                serde_json::to_string_pretty(&data).unwrap_or_else(|e| e.to_string())
            }
            OutputFormat::Yaml => serde_yaml::to_string(&data).unwrap_or_else(|e| e.to_string()),
        }
    }

    fn format_table<T: Tabled + Serialize>(&self, data: Vec<T>) -> String {
        match self {
            OutputFormat::Table => {
                if data.is_empty() {
                    "No data to display".to_string()
                } else {
                    Table::new(data).to_string()
                }
            }
            OutputFormat::Json => {
                serde_json::to_string_pretty(&data).unwrap_or_else(|e| e.to_string())
            }
            OutputFormat::Yaml => serde_yaml::to_string(&data).unwrap_or_else(|e| e.to_string()),
        }
    }
}

impl OutputFormat {
    pub fn is_table(&self) -> bool {
        matches!(self, OutputFormat::Table)
    }
}

/// Instance state for table cells; plain text for machine formats.
pub fn state_cell(state: InstanceState, format: OutputFormat) -> String {
    let text = state.to_string();
    if !format.is_table() {
        return text;
    }
    match state {
        InstanceState::Running => text.green().to_string(),
        InstanceState::Stopped => text.red().to_string(),
        InstanceState::Pending => text.cyan().to_string(),
        InstanceState::Terminated => text.dimmed().to_string(),
        InstanceState::Unknown => text.yellow().to_string(),
    }
}

pub fn format_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{bytes}B")
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

pub fn print_progress(message: &str) {
    println!("{} {}", "⟳".cyan(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(3 * 1024 * 1024 / 2), "1.5MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0GB");
    }

    #[test]
    fn test_machine_formats_are_uncolored() {
        assert_eq!(state_cell(InstanceState::Running, OutputFormat::Json), "running");
    }
}

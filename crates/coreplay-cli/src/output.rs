//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local};
use serde_json::Value;

use coreplay_core::{ConnectionEvent, VariableUpdates};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print one flushed batch of variables
    pub fn print_variables(&self, at: DateTime<Local>, values: &VariableUpdates) {
        match self.format {
            OutputFormat::Human => {
                let stamp = at.format("%H:%M:%S%.3f");
                for (id, value) in values {
                    println!("{} {:<26} {}", stamp, id, truncate(&compact(value), 80));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "at": at.to_rfc3339(), "variables": values })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a connection event
    pub fn print_event(&self, event: &ConnectionEvent) {
        match self.format {
            OutputFormat::Human => match event {
                ConnectionEvent::StatusChanged(state) => eprintln!("● {}", state),
                ConnectionEvent::Synced { sections } => {
                    eprintln!("✓ Synchronized {} sections", sections)
                }
                ConnectionEvent::PatchRejected(reason) => eprintln!("⚠ Patch skipped: {}", reason),
                ConnectionEvent::Resync(reason) => eprintln!("↻ Resyncing: {}", reason),
                ConnectionEvent::Error(reason) => eprintln!("✗ {}", reason),
            },
            OutputFormat::Json => {
                let (kind, detail) = match event {
                    ConnectionEvent::StatusChanged(state) => ("status", state.to_string()),
                    ConnectionEvent::Synced { sections } => ("synced", sections.to_string()),
                    ConnectionEvent::PatchRejected(reason) => ("patch_rejected", reason.clone()),
                    ConnectionEvent::Resync(reason) => ("resync", reason.clone()),
                    ConnectionEvent::Error(reason) => ("error", reason.clone()),
                };
                eprintln!("{}", serde_json::json!({ "event": kind, "detail": detail }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a JSON value (document, subtree or version)
    pub fn print_value(&self, value: &Value) {
        match self.format {
            OutputFormat::Human | OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| compact(value))
                );
            }
            OutputFormat::Quiet => println!("{}", compact(value)),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Single-line rendering; strings without quotes
fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("überlänge text", 8), "überl...");
    }

    #[test]
    fn test_compact() {
        assert_eq!(compact(&json!("Crossfade")), "Crossfade");
        assert_eq!(compact(&json!(2500)), "2500");
        assert_eq!(compact(&json!(null)), "null");
        assert_eq!(compact(&json!({"a": 1})), "{\"a\":1}");
    }
}

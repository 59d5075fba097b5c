//! Engine report
//!
//! Dumps the engine counters on demand (typically at exit), controlled by the
//! `COSTACK_REPORT` env var:
//! - Unset → no report, zero cost
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! ## Feature Flag
//!
//! JSON output requires the `report-json` feature (enabled by default).
//! Without it, JSON requests fall back to the human format.

use crate::stats::{StatsSnapshot, snapshot};
use std::io::Write;
use std::sync::OnceLock;
use tracing::warn;

// =============================================================================
// Report Configuration (parsed from COSTACK_REPORT env var)
// =============================================================================

/// Output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

/// Parsed report configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from COSTACK_REPORT environment variable
    pub fn from_env() -> Option<Self> {
        let val = std::env::var("COSTACK_REPORT").ok()?;
        Self::parse(&val)
    }

    /// Parse a COSTACK_REPORT value; `None` disables the report
    pub fn parse(val: &str) -> Option<Self> {
        match val {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") && s.len() > 5 => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                warn!(value = val, "COSTACK_REPORT not recognized, ignoring");
                None
            }
        }
    }
}

static REPORT_CONFIG: OnceLock<Option<ReportConfig>> = OnceLock::new();

fn get_report_config() -> &'static Option<ReportConfig> {
    REPORT_CONFIG.get_or_init(ReportConfig::from_env)
}

// =============================================================================
// Formatting
// =============================================================================

fn format_human(data: &StatsSnapshot) -> String {
    let mut out = String::new();
    out.push_str("=== COSTACK REPORT ===\n");
    out.push_str(&format!("Coroutines created:   {}\n", data.coroutines_created));
    out.push_str(&format!("Coroutines finished:  {}\n", data.coroutines_finished));
    out.push_str(&format!("Coroutines abandoned: {}\n", data.coroutines_abandoned));
    out.push_str(&format!(
        "Stacks mapped:        {} ({} released)\n",
        data.arenas_acquired, data.arenas_released
    ));
    out.push_str(&format!("Stack bytes current:  {} bytes\n", data.mapped_bytes));
    out.push_str(&format!("Stack bytes peak:     {} bytes\n", data.peak_mapped_bytes));
    out.push_str(&format!("Context switches:     {}\n", data.context_switches));
    out.push_str(&format!("Root call chains:     {}\n", data.root_chains));
    out.push_str(&format!("Root-stack callbacks: {}\n", data.root_callbacks));
    out.push_str("======================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(data: &StatsSnapshot) -> String {
    let fields: [(&str, u64); 10] = [
        ("coroutines_created", data.coroutines_created),
        ("coroutines_finished", data.coroutines_finished),
        ("coroutines_abandoned", data.coroutines_abandoned),
        ("arenas_acquired", data.arenas_acquired),
        ("arenas_released", data.arenas_released),
        ("mapped_bytes", data.mapped_bytes as u64),
        ("peak_mapped_bytes", data.peak_mapped_bytes as u64),
        ("context_switches", data.context_switches),
        ("root_chains", data.root_chains),
        ("root_callbacks", data.root_callbacks),
    ];

    let map: serde_json::Map<String, serde_json::Value> = fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), serde_json::Value::Number(value.into())))
        .collect();

    let obj = serde_json::Value::Object(map);
    serde_json::to_string(&obj).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
fn format_json(data: &StatsSnapshot) -> String {
    warn!("COSTACK_REPORT=json requires the 'report-json' feature, falling back to human format");
    format_human(data)
}

/// Render `data` in the configured format
pub fn render(config: &ReportConfig, data: &StatsSnapshot) -> String {
    match config.format {
        ReportFormat::Human => format_human(data),
        ReportFormat::Json => format_json(data),
    }
}

// =============================================================================
// Emit
// =============================================================================

/// Write the report if `COSTACK_REPORT` asks for one
pub fn emit_report() {
    if let Some(config) = get_report_config() {
        emit_report_with(config);
    }
}

/// Write the current counters according to `config`
pub fn emit_report_with(config: &ReportConfig) {
    let output = render(config, &snapshot());

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            let written = std::fs::File::create(path).and_then(|mut f| f.write_all(output.as_bytes()));
            if let Err(e) = written {
                warn!(path = %path, error = %e, "could not write report, using stderr");
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

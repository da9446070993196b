//! Report → human/json string formatting.

use kvparity_seeder::{DiffReport, Error, RunReport, Snapshot};

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Mismatches printed in human mode
const HUMAN_MISMATCH_LIMIT: usize = 50;

/// Format a run report.
pub fn format_run(report: &RunReport, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => report
            .to_json()
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputMode::Human => report.to_string(),
    }
}

/// Format a comparison.
pub fn format_diff(report: &DiffReport, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => report
            .to_json()
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputMode::Human => {
            let verdict = if report.is_consistent() {
                "consistent"
            } else {
                "INCONSISTENT"
            };
            format!("{}{}", report.render(HUMAN_MISMATCH_LIMIT), verdict)
        }
    }
}

/// Format a snapshot.
pub fn format_snapshot(snapshot: &Snapshot, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => snapshot
            .to_json()
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputMode::Human => {
            let mut out = format!(
                "{}: {} keys, digest {:016x}, {} pass(es){}\n",
                snapshot.meta.target,
                snapshot.len(),
                snapshot.digest(),
                snapshot.meta.passes,
                if snapshot.meta.stable { "" } else { ", unstable" }
            );
            for (key, state) in &snapshot.entries {
                out.push_str(&format!("  {} {}\n", key, state.summary()));
            }
            out
        }
    }
}

/// Short machine-readable name of an error variant
fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Connectivity { .. } => "connectivity",
        Error::Protocol { .. } => "protocol",
        Error::InvalidConfig(_) => "invalid_config",
        Error::Io(_) => "io",
        Error::Lifecycle(_) => "lifecycle",
        Error::UnknownSnapshot(_) => "unknown_snapshot",
        Error::Cancelled => "cancelled",
    }
}

/// Format an error. Target-tagged errors name the target and, for
/// connectivity failures, how many attempts were made.
pub fn format_error(err: &Error, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            let mut body = serde_json::json!({
                "kind": error_kind(err),
                "message": err.to_string(),
            });
            if let Some(target) = err.target() {
                body["target"] = target.into();
            }
            if let Error::Connectivity { attempts, .. } = err {
                body["attempts"] = (*attempts).into();
            }
            serde_json::to_string_pretty(&serde_json::json!({ "error": body }))
                .unwrap_or_else(|_| format!("{{\"error\": {{\"message\": \"{}\"}}}}", err))
        }
        OutputMode::Human => match err {
            Error::Connectivity { .. } => {
                format!("(error) {}\n(hint) is the target running and reachable?", err)
            }
            Error::Protocol { .. } => {
                format!("(error) {}\n(hint) the target does not speak the expected RESP dialect", err)
            }
            _ => format!("(error) {}", err),
        },
    }
}

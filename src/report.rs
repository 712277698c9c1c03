/// Smoke run report and its text / JSON renderings.
use crate::verdict::FailureReason;
use crate::watchdog::WatchdogState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub success: bool,
    pub failure: Option<FailureReason>,
    /// States the watchdog went through, in order.
    pub states: Vec<WatchdogState>,
    pub ticks: u32,
    pub max_ticks: u32,
    pub pid: u32,
    /// How the server ended, e.g. `exit code 0` or `signal SIGINT`.
    pub exit: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub log: String,
}

impl Report {
    /// Process exit code for the watchdog itself.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn final_state(&self) -> Option<WatchdogState> {
        self.states.last().copied()
    }
}

pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    match status.signal() {
        Some(sig) => match nix::sys::signal::Signal::try_from(sig) {
            Ok(signal) => format!("signal {}", signal.as_str()),
            Err(_) => format!("signal {sig}"),
        },
        None => "unknown".to_string(),
    }
}

/// Human-readable summary. Failures carry the full log for diagnosis.
pub fn render_text(report: &Report) -> String {
    match &report.failure {
        None => "Development server is up.\n".to_string(),
        Some(reason) => {
            let mut out = format!("Development server is not running properly: {reason}\n");
            out.push_str(&format!(
                "Server end: {}, after {} polls. Output:\n",
                report.exit, report.ticks
            ));
            out.push_str(&report.log);
            if !report.log.is_empty() && !report.log.ends_with('\n') {
                out.push('\n');
            }
            out
        }
    }
}

pub fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

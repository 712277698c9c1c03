use serde::Serialize;

/// Why a smoke run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// The ready marker never appeared within the poll budget.
    StartupTimeout { ticks: u32 },
    /// The captured log matched a crash pattern.
    Crash { pattern: String },
    /// The server stopped without ever printing the marker.
    MarkerMissing,
    /// The server could not be waited on or stopped cleanly.
    ServerControl { error: String },
    /// The watchdog itself was interrupted.
    Interrupted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::StartupTimeout { ticks } => {
                write!(f, "ready marker not seen after {ticks} polls")
            }
            FailureReason::Crash { pattern } => {
                write!(f, "server output matched crash pattern '{pattern}'")
            }
            FailureReason::MarkerMissing => write!(f, "server exited without printing the ready marker"),
            FailureReason::ServerControl { error } => write!(f, "lost control of server: {error}"),
            FailureReason::Interrupted => write!(f, "watchdog interrupted"),
        }
    }
}

/// Outcome of a smoke run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(FailureReason),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Verdict::Passed => None,
            Verdict::Failed(reason) => Some(reason),
        }
    }
}

/// What the watchdog observed by the time the server stopped.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub marker_seen: bool,
    pub timed_out: bool,
    pub aborted: bool,
    pub ticks: u32,
    /// Crash pattern found in the full log, if any.
    pub crash_pattern: Option<String>,
    /// Error from waiting on or stopping the server.
    pub server_error: Option<String>,
}

/// Decide pass/fail.
///
/// A crash trace fails the run even if the marker was printed, then a server
/// we could not stop; otherwise the run passes only if the marker was seen in
/// time.
pub fn decide(evidence: &Evidence) -> Verdict {
    if let Some(pattern) = &evidence.crash_pattern {
        return Verdict::Failed(FailureReason::Crash {
            pattern: pattern.clone(),
        });
    }
    if let Some(error) = &evidence.server_error {
        return Verdict::Failed(FailureReason::ServerControl {
            error: error.clone(),
        });
    }
    if evidence.aborted {
        return Verdict::Failed(FailureReason::Interrupted);
    }
    if evidence.timed_out {
        return Verdict::Failed(FailureReason::StartupTimeout {
            ticks: evidence.ticks,
        });
    }
    if !evidence.marker_seen {
        return Verdict::Failed(FailureReason::MarkerMissing);
    }
    Verdict::Passed
}

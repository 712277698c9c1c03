/// Startup watchdog for the dev server.
///
/// Launches the server, polls its output on a fixed interval for the ready
/// marker, and stops it once the marker shows up or the poll budget runs
/// out. The poll timer is disarmed on every exit path before `run` returns.
use crate::config::SmokeConfig;
use crate::detect::{CrashDetector, MarkerScanner};
use crate::output_log::OutputLog;
use crate::report::{self, Report};
use crate::server::{ServerError, ServerProcess};
use crate::ticker::PollTimer;
use crate::verdict::{self, Evidence};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Watchdog states, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Starting,
    Polling,
    /// Marker seen.
    Ready,
    /// Poll budget exhausted.
    TimedOut,
    /// Server exited on its own.
    Exited,
    /// Watchdog received Ctrl-C.
    Aborted,
    Stopping,
    Passed,
    Failed,
}

/// Errors that prevent the watchdog from reaching a verdict.
#[derive(Debug)]
pub enum WatchdogError {
    Server(ServerError),
    Pattern {
        source: regex::Error,
    },
}

impl std::fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchdogError::Server(e) => write!(f, "{e}"),
            WatchdogError::Pattern { source } => write!(f, "invalid crash pattern: {source}"),
        }
    }
}

impl std::error::Error for WatchdogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchdogError::Server(e) => Some(e),
            WatchdogError::Pattern { source } => Some(source),
        }
    }
}

impl From<ServerError> for WatchdogError {
    fn from(e: ServerError) -> Self {
        WatchdogError::Server(e)
    }
}

struct StateTrail {
    states: Vec<WatchdogState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            states: vec![WatchdogState::Starting],
        }
    }

    fn enter(&mut self, next: WatchdogState) {
        tracing::debug!(from = ?self.states.last(), to = ?next, "watchdog state");
        self.states.push(next);
    }
}

pub struct Watchdog {
    config: SmokeConfig,
    ticks: Arc<AtomicU32>,
}

impl Watchdog {
    pub fn new(config: SmokeConfig) -> Self {
        Self {
            config,
            ticks: Arc::new(AtomicU32::new(0)),
        }
    }

    #[cfg(test)]
    fn ticks(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.ticks)
    }

    /// Run one smoke check, aborting on Ctrl-C.
    pub async fn run(&self) -> Result<Report, WatchdogError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run one smoke check, treating completion of `abort` as an operator interrupt.
    pub async fn run_until<F>(&self, abort: F) -> Result<Report, WatchdogError>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let interval = Duration::from_millis(self.config.poll.interval_ms);
        let max_ticks = self.config.poll.max_ticks;
        let grace = Duration::from_secs(self.config.shutdown.grace_secs);

        let mut trail = StateTrail::new();
        let crash = CrashDetector::new(&self.config.markers.crash_patterns)
            .map_err(|e| WatchdogError::Pattern { source: e })?;

        let log = OutputLog::new();
        let mut scanner = MarkerScanner::new(log.cursor(), self.config.markers.ready.clone());
        let mut server = ServerProcess::spawn(&self.config.server, &log)?;
        let mut timer = PollTimer::arm(interval, max_ticks, Arc::clone(&self.ticks));
        trail.enter(WatchdogState::Polling);

        let mut evidence = Evidence::default();
        let mut exited = None;
        tokio::pin!(abort);

        loop {
            tokio::select! {
                tick = timer.tick() => {
                    let Some(n) = tick else {
                        trail.enter(WatchdogState::TimedOut);
                        evidence.timed_out = true;
                        break;
                    };
                    tracing::info!(tick = n, max_ticks, "polling dev server output");
                    if scanner.scan() {
                        tracing::info!(tick = n, "dev server is ready");
                        trail.enter(WatchdogState::Ready);
                        break;
                    }
                    if n >= max_ticks {
                        tracing::warn!(ticks = n, "dev server did not become ready in time");
                        trail.enter(WatchdogState::TimedOut);
                        evidence.timed_out = true;
                        break;
                    }
                }
                status = server.wait() => {
                    match status {
                        Ok(status) => {
                            tracing::warn!(exit = %report::describe_exit(&status), "dev server exited on its own");
                            exited = Some(status);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "lost track of dev server");
                            evidence.server_error = Some(e.to_string());
                        }
                    }
                    trail.enter(WatchdogState::Exited);
                    break;
                }
                () = &mut abort => {
                    tracing::warn!("interrupted, stopping dev server");
                    trail.enter(WatchdogState::Aborted);
                    evidence.aborted = true;
                    break;
                }
            }
        }

        timer.disarm().await;
        evidence.ticks = timer.count();
        trail.enter(WatchdogState::Stopping);

        let status = match exited {
            Some(status) => Some(status),
            None => match server.stop(grace).await {
                Ok(status) => Some(status),
                Err(e) => {
                    // Keep going: the captured log is still worth reporting.
                    tracing::error!(error = %e, "failed to stop dev server");
                    evidence.server_error.get_or_insert_with(|| e.to_string());
                    None
                }
            },
        };
        server.drain(grace).await;

        // Picks up anything printed between the last tick and exit.
        evidence.marker_seen = scanner.scan();
        let contents = log.contents();
        evidence.crash_pattern = crash.detect(&contents);

        let verdict = verdict::decide(&evidence);
        trail.enter(if verdict.passed() {
            WatchdogState::Passed
        } else {
            WatchdogState::Failed
        });
        tracing::info!(
            passed = verdict.passed(),
            ticks = evidence.ticks,
            lines = log.len(),
            "smoke check finished"
        );

        Ok(Report {
            success: verdict.passed(),
            failure: verdict.reason().cloned(),
            states: trail.states,
            ticks: evidence.ticks,
            max_ticks,
            pid: server.pid(),
            exit: status
                .as_ref()
                .map(report::describe_exit)
                .unwrap_or_else(|| "unknown".to_string()),
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            log: contents,
        })
    }
}

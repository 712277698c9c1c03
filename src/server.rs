/// Server process lifecycle: spawn the dev server with stdout and stderr
/// sharing one pipe (`2>&1`), pump that pipe into the shared log, stop it
/// with an interrupt and escalate to a kill if it outlives the grace period.
use crate::config::ServerConfig;
use crate::output_log::OutputLog;
use crate::signals;
use nix::fcntl::OFlag;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Errors that can occur while driving the server process.
#[derive(Debug)]
pub enum ServerError {
    /// Failed to set up the output pipe.
    Pipe { source: std::io::Error },
    /// Failed to spawn the server subprocess.
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },
    /// Failed to wait on the child.
    Io { source: std::io::Error },
    /// Failed to deliver a signal to the server's process group.
    Signal { source: nix::errno::Errno },
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Pipe { source } => write!(f, "failed to create output pipe: {}", source),
            ServerError::Spawn { command, source } => {
                write!(f, "failed to spawn {}: {}", command.display(), source)
            }
            ServerError::Io { source } => write!(f, "I/O error waiting on server: {}", source),
            ServerError::Signal { source } => {
                write!(f, "failed to signal server process group: {}", source)
            }
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Pipe { source } => Some(source),
            ServerError::Spawn { source, .. } => Some(source),
            ServerError::Io { source } => Some(source),
            ServerError::Signal { source } => Some(source),
        }
    }
}

/// Resolve the server command.
///
/// A relative path that exists next to the watchdog binary wins. Anything
/// else is handed to the OS unchanged: a bare name like `sh` is looked up on
/// PATH, a name containing `/` is resolved against the working directory.
pub fn resolve_command(command: &str) -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_command_in(command, exe_dir.as_deref())
}

fn resolve_command_in(command: &str, exe_dir: Option<&Path>) -> PathBuf {
    let path = Path::new(command);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if let Some(dir) = exe_dir {
        let candidate = dir.join(path);
        if candidate.is_file() {
            return candidate;
        }
    }
    path.to_path_buf()
}

/// A running server with its output pump.
pub struct ServerProcess {
    child: Child,
    pid: u32,
    pump: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Spawn the server in its own process group with stdout and stderr merged into `log`.
    pub fn spawn(config: &ServerConfig, log: &OutputLog) -> Result<Self, ServerError> {
        let command = resolve_command(&config.command);
        tracing::info!(
            command = %command.display(),
            args = ?config.args,
            "spawning dev server"
        );

        // One pipe for both streams keeps lines in the order they were written.
        let (read_end, write_end) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| ServerError::Pipe { source: e.into() })?;
        let stderr_end = write_end
            .try_clone()
            .map_err(|e| ServerError::Pipe { source: e })?;
        let output =
            pipe::Receiver::from_owned_fd(read_end).map_err(|e| ServerError::Pipe { source: e })?;

        // The command, and with it our copies of the write end, is dropped right
        // after spawning so EOF arrives once the server side closes.
        let mut child = Command::new(&command)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .process_group(0) // New process group so signals reach the whole tree
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServerError::Spawn {
                command: command.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, "dev server started");

        let pump = spawn_pump(output, log.clone());

        Ok(Self {
            child,
            pid,
            pump: Some(pump),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the server to exit on its own. Cancel safe.
    pub async fn wait(&mut self) -> Result<ExitStatus, ServerError> {
        self.child
            .wait()
            .await
            .map_err(|e| ServerError::Io { source: e })
    }

    /// Interrupt the server and wait up to `grace` for it to exit, then kill it.
    pub async fn stop(&mut self, grace: Duration) -> Result<ExitStatus, ServerError> {
        if let Some(status) = self
            .child
            .try_wait()
            .map_err(|e| ServerError::Io { source: e })?
        {
            return Ok(status);
        }

        tracing::info!(pid = self.pid, "sending interrupt to dev server");
        signals::interrupt_group(self.pid).map_err(|e| ServerError::Signal { source: e })?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status.map_err(|e| ServerError::Io { source: e }),
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    grace_secs = grace.as_secs_f64(),
                    "dev server ignored interrupt, killing process group"
                );
                signals::kill_group(self.pid).map_err(|e| ServerError::Signal { source: e })?;
                // The leader may have left its group (setsid); hit it directly too.
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(pid = self.pid, error = %e, "direct kill skipped");
                }
                self.wait().await
            }
        }
    }

    /// Wait up to `timeout` for the output pump to hit EOF, then abort it.
    ///
    /// A grandchild that inherited the pipe can keep it open after the
    /// server itself has exited.
    pub async fn drain(&mut self, timeout: Duration) {
        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(timeout, &mut pump).await.is_err() {
                tracing::warn!(pid = self.pid, "output still open after server exit, abandoning");
                pump.abort();
            }
        }
    }
}

fn spawn_pump<R>(stream: R, log: OutputLog) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    tracing::trace!("{}", line);
                    log.push(line);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed reading server output");
                    break;
                }
            }
        }
        tracing::debug!("server output closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn sh(script: &str) -> ServerConfig {
        ServerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_resolve_prefers_file_next_to_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run-dev.py"), "#!/bin/sh\n").unwrap();
        assert_eq!(
            resolve_command_in("run-dev.py", Some(dir.path())),
            dir.path().join("run-dev.py")
        );
    }

    #[test]
    fn test_resolve_falls_back_to_command_as_given() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_command_in("sh", Some(dir.path())),
            PathBuf::from("sh")
        );
        assert_eq!(resolve_command_in("sh", None), PathBuf::from("sh"));
    }

    #[test]
    fn test_resolve_leaves_slashed_relative_path_for_cwd() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_command_in("./manage.py", Some(dir.path())),
            PathBuf::from("./manage.py")
        );
    }

    #[tokio::test]
    async fn test_bare_name_spawns_from_path() {
        let log = OutputLog::new();
        let config = ServerConfig {
            command: "echo".to_string(),
            args: vec!["found on path".to_string()],
        };
        let mut server = ServerProcess::spawn(&config, &log).unwrap();
        server.wait().await.unwrap();
        server.drain(Duration::from_secs(5)).await;
        assert_eq!(log.contents(), "found on path\n");
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        assert_eq!(
            resolve_command_in("/usr/bin/env", Some(Path::new("/tmp"))),
            PathBuf::from("/usr/bin/env")
        );
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let log = OutputLog::new();
        let mut server = ServerProcess::spawn(&sh("echo out; echo err >&2"), &log).unwrap();
        let status = server.wait().await.unwrap();
        server.drain(Duration::from_secs(5)).await;

        assert!(status.success());
        assert_eq!(log.contents(), "out\nerr\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interleaved_streams_keep_write_order() {
        let script = "echo 1; echo 2 >&2; echo 3; echo 4 >&2; echo 5";
        for _ in 0..20 {
            let log = OutputLog::new();
            let mut server = ServerProcess::spawn(&sh(script), &log).unwrap();
            server.wait().await.unwrap();
            server.drain(Duration::from_secs(5)).await;
            assert_eq!(log.contents(), "1\n2\n3\n4\n5\n");
        }
    }

    #[tokio::test]
    async fn test_keeps_final_line_without_newline() {
        let log = OutputLog::new();
        let mut server = ServerProcess::spawn(&sh("printf 'no newline'"), &log).unwrap();
        server.wait().await.unwrap();
        server.drain(Duration::from_secs(5)).await;
        assert_eq!(log.contents(), "no newline\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let log = OutputLog::new();
        let mut server = ServerProcess::spawn(&sh(r"printf 'a\377b\n'"), &log).unwrap();
        server.wait().await.unwrap();
        server.drain(Duration::from_secs(5)).await;
        assert_eq!(log.contents(), "a\u{FFFD}b\n");
    }

    #[tokio::test]
    async fn test_stop_interrupts_running_server() {
        let log = OutputLog::new();
        let mut server = ServerProcess::spawn(&sh("exec sleep 30"), &log).unwrap();
        let status = server.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGINT as i32));
    }

    #[tokio::test]
    async fn test_stop_kills_server_ignoring_interrupt() {
        let log = OutputLog::new();
        let mut server = ServerProcess::spawn(
            &sh("trap '' INT; echo armed; while true; do sleep 1; done"),
            &log,
        )
        .unwrap();
        // Let the trap get installed before interrupting.
        while log.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = server.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn test_stop_after_exit_returns_status() {
        let log = OutputLog::new();
        let mut server = ServerProcess::spawn(&sh("exit 3"), &log).unwrap();
        server.wait().await.unwrap();
        let status = server.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let log = OutputLog::new();
        let config = ServerConfig {
            command: "/nonexistent-dir/run-dev.py".to_string(),
            args: Vec::new(),
        };
        let err = ServerProcess::spawn(&config, &log).err().unwrap();
        assert!(matches!(err, ServerError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent-dir/run-dev.py"));
    }
}

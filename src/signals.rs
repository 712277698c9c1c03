/// Signal delivery to the server's process group.
///
/// The server is spawned as a process group leader, so its pid doubles as
/// the group id and a signal reaches every descendant (e.g. the Django
/// autoreloader and its worker).
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

/// Ask the group to shut down (Ctrl-C equivalent).
pub fn interrupt_group(pgid: u32) -> Result<(), Errno> {
    send_to_group(pgid, Signal::SIGINT)
}

/// Force the group down.
pub fn kill_group(pgid: u32) -> Result<(), Errno> {
    send_to_group(pgid, Signal::SIGKILL)
}

fn send_to_group(pgid: u32, signal: Signal) -> Result<(), Errno> {
    let pgid = i32::try_from(pgid).map_err(|_| Errno::EINVAL)?;
    if pgid <= 1 {
        // 0 would signal our own group, 1 is init.
        return Err(Errno::EINVAL);
    }
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => {
            tracing::debug!(pgid, signal = %signal, "signal sent to server group");
            Ok(())
        }
        // Already gone.
        Err(Errno::ESRCH) => {
            tracing::debug!(pgid, signal = %signal, "server group already exited");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

use crate::config::RestartMode;
use anyhow::Context;
use std::process::Command;

/// Exit status that tells the process supervisor (systemd `Restart=`,
/// a container restart policy, a wrapper script) to start the bot again.
/// `EX_TEMPFAIL` from sysexits.h.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Command line that starts this process again with the same arguments.
fn relaunch_command() -> anyhow::Result<Command> {
    let exe = std::env::current_exe().context("cannot locate the running executable")?;
    let mut cmd = Command::new(exe);
    cmd.args(std::env::args_os().skip(1));
    Ok(cmd)
}

/// Replace the running process image with a fresh copy of itself.
///
/// Only returns when the replacement could not be started.
#[cfg(unix)]
fn reexec() -> anyhow::Error {
    use std::os::unix::process::CommandExt;

    match relaunch_command() {
        Ok(mut cmd) => anyhow::Error::new(cmd.exec()).context("re-exec failed"),
        Err(e) => e,
    }
}

/// Start a fresh copy of the process and exit this one.
#[cfg(not(unix))]
fn reexec() -> anyhow::Error {
    match relaunch_command().and_then(|mut cmd| cmd.spawn().context("relaunch failed")) {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}

/// Final step of every restart, after the graceful shutdown finished.
pub fn finish_restart(mode: RestartMode) -> ! {
    match mode {
        RestartMode::Supervisor => {
            tracing::info!("♻️ Exiting with status {RESTART_EXIT_CODE} for the supervisor");
            std::process::exit(RESTART_EXIT_CODE)
        }
        RestartMode::Reexec => {
            tracing::info!("♻️ Re-executing in place");
            let err = reexec();
            tracing::error!("{err:#}; exiting for the supervisor instead");
            std::process::exit(RESTART_EXIT_CODE)
        }
    }
}

/// Used when the graceful shutdown did not finish in time: go straight to a
/// fresh process image.
pub fn force_restart() -> ! {
    tracing::warn!("♻️ Graceful shutdown timed out, re-executing in place");
    let err = reexec();
    tracing::error!("{err:#}");
    std::process::exit(RESTART_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_exit_code_is_tempfail() {
        assert_eq!(RESTART_EXIT_CODE, 75);
    }

    #[test]
    fn relaunch_reuses_current_executable() {
        let cmd = relaunch_command().unwrap();
        let exe = std::env::current_exe().unwrap();
        assert_eq!(cmd.get_program(), exe.as_os_str());
    }
}

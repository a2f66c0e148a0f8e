//! # Method spawning with the pending-process handshake.
//!
//! Forking a unit method races against short-lived children: a command that
//! exits immediately could be gone before the restarter has recorded its
//! PID, and the exit event would find nobody to deliver to. The handshake
//! closes that race:
//!
//! 1. the parent creates a gate pipe and spawns the child;
//! 2. the child, before `exec`, blocks reading one byte from the gate;
//! 3. the parent records the PID with the tracker and the unit's PID set;
//! 4. the parent releases the gate and the child proceeds to `exec`.
//!
//! The child also gets `NOTIFY_SOCKET` pointed at the notification
//! receiver before release so daemons can report readiness.

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};

use crate::error::SpawnError;
use crate::path::ServicePath;
use crate::units::MethodKind;

use super::tracker::Pid;

/// Signals the restarter is allowed to end processes with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillSignal {
    /// Polite request (`SIGTERM`).
    Term,
    /// Forced end (`SIGKILL`).
    Kill,
}

/// A forked child still waiting on the handshake gate.
///
/// The caller must enrol [`PendingChild::pid`] with the tracker and the
/// unit's PID set, then call [`PendingChild::release`]. Dropping the value
/// releases the gate as well, so an early error path cannot leave a child
/// blocked forever.
#[derive(Debug)]
pub struct PendingChild {
    pid: Pid,
    gate: Option<OwnedFd>,
}

impl PendingChild {
    /// A child with no gate, produced by deterministic backends.
    pub fn ready(pid: Pid) -> Self {
        Self { pid, gate: None }
    }

    /// The child's PID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Releases the child to `exec`.
    pub fn release(mut self) {
        self.release_gate();
    }

    fn release_gate(&mut self) {
        if let Some(gate) = self.gate.take() {
            let _ = nix::unistd::write(&gate, &[1]);
        }
    }
}

impl Drop for PendingChild {
    fn drop(&mut self) {
        self.release_gate();
    }
}

/// Forks unit methods and delivers termination signals.
pub trait Spawner: Send {
    /// Forks `cmd` for the given unit method. The child is blocked on the
    /// handshake gate until [`PendingChild::release`].
    fn spawn_method(
        &mut self,
        path: &ServicePath,
        method: MethodKind,
        cmd: &str,
        notify_socket: &Path,
    ) -> Result<PendingChild, SpawnError>;

    /// Sends a termination signal. Delivery to an already-gone PID is not
    /// an error.
    fn kill(&mut self, pid: Pid, sig: KillSignal);
}

/// Real backend: `/bin/sh -c` children with the gate pipe.
#[derive(Debug, Default)]
pub struct OsSpawner;

impl OsSpawner {
    /// Creates the backend.
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for OsSpawner {
    fn spawn_method(
        &mut self,
        path: &ServicePath,
        method: MethodKind,
        cmd: &str,
        notify_socket: &Path,
    ) -> Result<PendingChild, SpawnError> {
        let (gate_rd, gate_wr) =
            nix::unistd::pipe().map_err(|e| SpawnError::Pipe(std::io::Error::from(e)))?;
        // The write end must not leak into the exec'd image.
        fcntl(gate_wr.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| SpawnError::Pipe(std::io::Error::from(e)))?;

        let rd_raw = gate_rd.as_raw_fd();
        let wr_raw = gate_wr.as_raw_fd();

        let mut command = std::process::Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(cmd)
            .env("NOTIFY_SOCKET", notify_socket);

        // Safety: only async-signal-safe calls between fork and exec.
        unsafe {
            command.pre_exec(move || {
                unsafe {
                    nix::libc::close(wr_raw);
                    let mut byte = [0u8; 1];
                    loop {
                        let n = nix::libc::read(rd_raw, byte.as_mut_ptr().cast(), 1);
                        if n >= 0 {
                            break;
                        }
                        let err = std::io::Error::last_os_error();
                        if err.kind() != std::io::ErrorKind::Interrupted {
                            return Err(err);
                        }
                    }
                    nix::libc::close(rd_raw);
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(SpawnError::Fork)?;
        let pid = child.id() as Pid;
        tracing::debug!(%path, %method, pid, "forked method child");

        // The tracker reaps; the std handle would try to as well.
        drop(child);
        drop(gate_rd);

        Ok(PendingChild {
            pid,
            gate: Some(gate_wr),
        })
    }

    fn kill(&mut self, pid: Pid, sig: KillSignal) {
        let signal = match sig {
            KillSignal::Term => nix::sys::signal::Signal::SIGTERM,
            KillSignal::Kill => nix::sys::signal::Signal::SIGKILL,
        };
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => tracing::warn!(pid, signal = ?sig, error = %err, "kill failed"),
        }
    }
}

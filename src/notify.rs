//! # Readiness notification receiver.
//!
//! Supervised children report back over a datagram socket at a well-known
//! path, exported to them as `NOTIFY_SOCKET`. Messages are newline-separated
//! `KEY=VALUE` lines; recognized keys:
//!
//! - `READY=1` — the service is up; delivered as a readiness signal.
//! - `STATUS=<text>` — free-form status annotation.
//! - `MAINPID=<n>` — the unit's main PID moved (daemons that re-parent).
//!
//! The sender is identified by `SO_PASSCRED` peer credentials, so a stray
//! process cannot impersonate a supervised child: messages from PIDs no
//! unit owns are logged and dropped by the manager.

use std::io::{self, IoSliceMut};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use nix::sys::socket::{recvmsg, setsockopt, sockopt, ControlMessageOwned, MsgFlags};
use tokio::io::unix::AsyncFd;

use crate::process::Pid;

/// One recognized directive inside a datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyDirective {
    /// `READY=1`
    Ready,
    /// `STATUS=<text>`
    Status(String),
    /// `MAINPID=<n>`
    MainPid(Pid),
}

/// A parsed datagram with its sender identity.
#[derive(Clone, Debug)]
pub struct NotifyMessage {
    /// Sender PID from peer credentials, when the kernel supplied them.
    pub pid: Option<Pid>,
    /// Directives in message order.
    pub directives: Vec<NotifyDirective>,
}

/// Datagram socket bound at the notification path.
pub struct NotifyReceiver {
    fd: AsyncFd<UnixDatagram>,
}

impl NotifyReceiver {
    /// Binds the receiver, replacing any stale socket file.
    pub fn bind(path: &Path) -> io::Result<Self> {
        let _ = std::fs::remove_file(path);
        let sock = UnixDatagram::bind(path)?;
        sock.set_nonblocking(true)?;
        setsockopt(&sock, sockopt::PassCred, &true).map_err(io::Error::from)?;
        Ok(Self {
            fd: AsyncFd::new(sock)?,
        })
    }

    /// Waits for the next datagram and parses it.
    pub async fn recv(&mut self) -> io::Result<NotifyMessage> {
        loop {
            let mut guard = self.fd.readable().await?;
            let attempt = guard.try_io(|inner| {
                let mut buf = [0u8; 4096];
                let mut iov = [IoSliceMut::new(&mut buf)];
                let mut cmsg = nix::cmsg_space!(nix::sys::socket::UnixCredentials);
                let (len, pid) = {
                    let msg = recvmsg::<()>(
                        inner.get_ref().as_raw_fd(),
                        &mut iov,
                        Some(&mut cmsg),
                        MsgFlags::empty(),
                    )
                    .map_err(io::Error::from)?;
                    let pid = msg.cmsgs().ok().and_then(|mut cmsgs| {
                        cmsgs.find_map(|c| match c {
                            ControlMessageOwned::ScmCredentials(creds) => Some(creds.pid()),
                            _ => None,
                        })
                    });
                    (msg.bytes, pid)
                };
                let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                Ok(NotifyMessage {
                    pid,
                    directives: parse_directives(&text),
                })
            });
            match attempt {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Parses the newline-separated `KEY=VALUE` payload.
pub(crate) fn parse_directives(text: &str) -> Vec<NotifyDirective> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some(("READY", "1")) => out.push(NotifyDirective::Ready),
            Some(("STATUS", status)) => out.push(NotifyDirective::Status(status.to_string())),
            Some(("MAINPID", raw)) => match raw.parse::<Pid>() {
                Ok(pid) if pid > 0 => out.push(NotifyDirective::MainPid(pid)),
                _ => tracing::warn!(raw, "unparseable MAINPID"),
            },
            _ => tracing::debug!(line, "ignoring unknown notify directive"),
        }
    }
    out
}

//! # Wire form of notes for the inter-daemon RPC.
//!
//! Notes cross process boundaries as one JSON object per line:
//!
//! ```text
//! {"kind":"state_change","sub":"online","path":{"svc":"db","inst":"main"},"reason":2}
//! {"kind":"admin_req","sub":"disable","path":{"svc":"db","inst":null},"reason":0}
//! ```
//!
//! The envelope is the only part of the transport this crate owns; catalog
//! queries and everything else on the RPC socket belong to external
//! collaborators. [`NoteCodec`] frames and parses the envelope,
//! [`serve_notes`] feeds decoded notes from a local socket into the
//! manager's inbox.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, FramedRead, LinesCodec, LinesCodecError};

use futures::StreamExt;
use tokio_util::bytes::BytesMut;

use crate::notes::{AdminKind, Note, RequestKind, RestartOn, StateChangeKind};
use crate::path::ServicePath;

/// Envelope errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WireError {
    /// Line framing failed.
    #[error("framing: {0}")]
    Framing(#[from] LinesCodecError),

    /// Underlying I/O failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The line was not valid envelope JSON.
    #[error("malformed note: {0}")]
    Json(#[from] serde_json::Error),

    /// A field held a value outside the envelope vocabulary.
    #[error("unknown {field} value: {value}")]
    UnknownValue {
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Top-level `kind` discriminator of the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireKind {
    StateChange,
    AdminReq,
    RestarterReq,
}

/// The bit-exact note envelope.
///
/// Field order matters for byte-stable output: `kind`, `sub`, `path`,
/// `reason`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireNote {
    kind: WireKind,
    sub: String,
    path: ServicePath,
    reason: u8,
}

impl From<&Note> for WireNote {
    fn from(note: &Note) -> Self {
        let (kind, sub) = match note {
            Note::StateChange { kind, .. } => (
                WireKind::StateChange,
                match kind {
                    StateChangeKind::Online => "online",
                    StateChangeKind::Offline => "offline",
                    StateChangeKind::Disabled => "disabled",
                    StateChangeKind::Maintenance => "maintenance",
                },
            ),
            Note::AdminReq { kind, .. } => (
                WireKind::AdminReq,
                match kind {
                    AdminKind::Enable => "enable",
                    AdminKind::Disable => "disable",
                    AdminKind::Restart => "restart",
                },
            ),
            Note::RestarterReq { kind, .. } => (
                WireKind::RestarterReq,
                match kind {
                    RequestKind::Start => "start",
                    RequestKind::Stop => "stop",
                },
            ),
        };
        WireNote {
            kind,
            sub: sub.to_string(),
            path: note.path().clone(),
            reason: note.reason().as_u8(),
        }
    }
}

impl TryFrom<WireNote> for Note {
    type Error = WireError;

    fn try_from(wire: WireNote) -> Result<Self, WireError> {
        let reason = RestartOn::from_u8(wire.reason).ok_or_else(|| WireError::UnknownValue {
            field: "reason",
            value: wire.reason.to_string(),
        })?;
        let unknown_sub = || WireError::UnknownValue {
            field: "sub",
            value: wire.sub.clone(),
        };
        let note = match wire.kind {
            WireKind::StateChange => {
                let kind = match wire.sub.as_str() {
                    "online" => StateChangeKind::Online,
                    "offline" => StateChangeKind::Offline,
                    "disabled" => StateChangeKind::Disabled,
                    "maintenance" => StateChangeKind::Maintenance,
                    _ => return Err(unknown_sub()),
                };
                Note::state_change(kind, wire.path, reason)
            }
            WireKind::AdminReq => {
                let kind = match wire.sub.as_str() {
                    "enable" => AdminKind::Enable,
                    "disable" => AdminKind::Disable,
                    "restart" => AdminKind::Restart,
                    _ => return Err(unknown_sub()),
                };
                Note::admin(kind, wire.path, reason)
            }
            WireKind::RestarterReq => {
                let kind = match wire.sub.as_str() {
                    "start" => RequestKind::Start,
                    "stop" => RequestKind::Stop,
                    _ => return Err(unknown_sub()),
                };
                Note::request(kind, wire.path, reason)
            }
        };
        Ok(note)
    }
}

/// Encodes one note as its envelope line.
pub fn encode_line(note: &Note) -> String {
    // WireNote contains no map types, so serialization cannot fail.
    serde_json::to_string(&WireNote::from(note)).expect("note envelope is always serializable")
}

/// Parses one envelope line back into a note.
pub fn decode_line(line: &str) -> Result<Note, WireError> {
    let wire: WireNote = serde_json::from_str(line)?;
    Note::try_from(wire)
}

/// Line-delimited codec for [`Note`]s over a stream transport.
#[derive(Debug)]
pub struct NoteCodec {
    lines: LinesCodec,
}

impl NoteCodec {
    /// Creates a codec with an unbounded line length.
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new(),
        }
    }
}

impl Default for NoteCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NoteCodec {
    type Item = Note;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Note>, WireError> {
        match self.lines.decode(src)? {
            Some(line) => Ok(Some(decode_line(&line)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Note> for NoteCodec {
    type Error = WireError;

    fn encode(&mut self, note: Note, dst: &mut BytesMut) -> Result<(), WireError> {
        Ok(self.lines.encode(encode_line(&note), dst)?)
    }
}

/// Accepts connections on a local socket and forwards every decoded note
/// into `inbox`.
///
/// Malformed lines are logged and skipped; a closed inbox ends the server.
pub async fn serve_notes(listener: UnixListener, inbox: mpsc::UnboundedSender<Note>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "note listener accept failed");
                continue;
            }
        };
        let inbox = inbox.clone();
        tokio::spawn(async move {
            let mut framed = FramedRead::new(stream, NoteCodec::new());
            while let Some(decoded) = framed.next().await {
                match decoded {
                    Ok(note) => {
                        if inbox.send(note).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping malformed note");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_bit_exact() {
        let note = Note::state_change(
            StateChangeKind::Online,
            ServicePath::instance("db", "main"),
            RestartOn::Restart,
        );
        assert_eq!(
            encode_line(&note),
            r#"{"kind":"state_change","sub":"online","path":{"svc":"db","inst":"main"},"reason":2}"#
        );

        let note = Note::admin(AdminKind::Disable, ServicePath::service("db"), RestartOn::None);
        assert_eq!(
            encode_line(&note),
            r#"{"kind":"admin_req","sub":"disable","path":{"svc":"db","inst":null},"reason":0}"#
        );
    }

    #[test]
    fn notes_round_trip() {
        let notes = [
            Note::state_change(
                StateChangeKind::Maintenance,
                ServicePath::instance("a", "i"),
                RestartOn::Error,
            ),
            Note::admin(AdminKind::Enable, ServicePath::instance("a", "i"), RestartOn::Restart),
            Note::request(RequestKind::Stop, ServicePath::service("b"), RestartOn::Any),
        ];
        for note in notes {
            assert_eq!(decode_line(&encode_line(&note)).unwrap(), note);
        }
    }

    #[test]
    fn unknown_sub_is_rejected() {
        let err = decode_line(
            r#"{"kind":"admin_req","sub":"explode","path":{"svc":"a","inst":null},"reason":0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WireError::UnknownValue { field: "sub", .. }));
    }

    #[test]
    fn out_of_range_reason_is_rejected() {
        let err = decode_line(
            r#"{"kind":"restarter_req","sub":"start","path":{"svc":"a","inst":"i"},"reason":9}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WireError::UnknownValue { field: "reason", .. }));
    }
}

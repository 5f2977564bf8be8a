//! Response dispatcher
//!
//! Receives the kernel's datagrams for one request, classifies every
//! message and hands validated attribute maps to a per-command handler.
//!
//! # Educational Notes
//!
//! ## Message classification
//!
//! ```text
//!                   ┌──────────────────────┐
//!  datagram ──────► │ parse_netlink_messages│
//!                   └──────────┬───────────┘
//!        ┌───────────┬─────────┴──┬────────────────┐
//!        ▼           ▼            ▼                ▼
//!     Data        Error(errno)   Done(errno)     Overrun
//!        │         end loop      end loop        end loop
//!        ▼
//!  genl header ok? ── no ──► HeaderInvalid (abort the process)
//!        │
//!  same command?   ── no ──► CommandMismatch (ignored)
//!        │
//!  attributes decode? ─ no ─► HeaderInvalid
//!        │
//!  mandatory present? ─ no ─► Rejected (dropped, loop continues)
//!        │
//!        ▼
//!     Validated ──► handler.handle()
//! ```
//!
//! ## When does the loop end?
//!
//! Dumps are answered with `NLM_F_MULTI` messages closed by `NLMSG_DONE`.
//! A single-shot request gets one datagram without `NLM_F_MULTI`. So the
//! loop ends on `Done`, on an error message, after a datagram that carried
//! no multipart message, or as soon as the handler answers `Control::Stop`.

use crate::netlink::batadv::{Attr, Command};
use crate::netlink::message::{
    MessageError, NetlinkMessage, parse_attributes, parse_netlink_messages,
};
use crate::netlink::policy::{DecodeError, ParsedMessage};
use crate::netlink::socket::{RECV_BUFFER_SIZE, SocketError, Transport};
use crate::netlink::structures::{GENL_HDRLEN, GenlMsgHdr, NLM_F_MULTI, read_struct};
use crate::strerror;
use std::io;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors of a netlink query session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Socket(#[from] SocketError),

    /// The kernel sent something this tool cannot interpret
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A reply the caller depends on lacked required attributes
    #[error("missing attributes from kernel: {0}")]
    MissingAttributes(Attr),

    /// `NLMSG_ERROR` or `NLMSG_DONE` with a non-zero errno
    #[error("kernel reported error: {}", strerror(.0.abs()))]
    Kernel(i32),

    /// Kernel errno already printed as `Error received: ...`
    #[error("kernel reported error: {}", strerror(.0.abs()))]
    Reported(i32),

    /// Generic netlink family (or multicast group) unknown to the kernel
    #[error("generic netlink family {0} is not available")]
    ProtocolUnsupported(String),

    #[error("interface {0} is unknown")]
    UnknownInterface(String),

    /// Best-route lookup found no matching entry
    #[error("no matching entry found")]
    NotFound,

    /// A reply that must carry a value did not
    #[error("invalid encoding: {0}")]
    InvalidEncoding(&'static str),

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Errno equivalent, as the kernel module or libc would report it
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            SessionError::Socket(e) => e.errno().unwrap_or(libc::EIO),
            SessionError::MalformedResponse(_) | SessionError::InvalidEncoding(_) => libc::EINVAL,
            SessionError::MissingAttributes(_) => libc::EINVAL,
            SessionError::Kernel(errno) | SessionError::Reported(errno) => *errno,
            SessionError::ProtocolUnsupported(_) => libc::EOPNOTSUPP,
            SessionError::UnknownInterface(_) => libc::ENODEV,
            SessionError::NotFound => libc::ENOENT,
            SessionError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// True when the kernel lacks the netlink interface for this request
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        self.errno() == libc::EOPNOTSUPP
    }
}

impl From<MessageError> for SessionError {
    fn from(e: MessageError) -> Self {
        SessionError::MalformedResponse(e.to_string())
    }
}

impl From<DecodeError> for SessionError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::MissingAttribute(attr) => SessionError::MissingAttributes(attr),
            other => SessionError::MalformedResponse(other.to_string()),
        }
    }
}

// ============================================================================
// HANDLER INTERFACE
// ============================================================================

/// What the dispatcher decided about one data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Decoded and all mandatory attributes present
    Validated(ParsedMessage),
    /// Message for another command sharing the socket
    CommandMismatch,
    /// Structurally valid but the named mandatory attribute is missing
    Rejected(Attr),
}

/// Handler verdict after one validated message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Per-command consumer of validated messages
pub trait ResponseHandler {
    /// Command whose replies this handler accepts
    fn command(&self) -> Command;

    /// Attributes that must be present before `handle` is called
    fn mandatory(&self) -> &[Attr];

    /// Consume one validated message
    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError>;

    /// Called once when the exchange ended without an error
    fn finish(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// How kernel-reported errors are surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReporting {
    /// Print `Error received: ...` to stderr (except `EOPNOTSUPP`)
    Print,
    /// Only return the errno to the caller
    Silent,
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classify the payload (genl header + attributes) of one data message
///
/// # Errors
///
/// `MalformedResponse` when the generic netlink header is truncated or an
/// attribute fails the codec. Both mean an incompatible kernel module.
pub fn classify(
    payload: &[u8],
    command: Command,
    mandatory: &[Attr],
) -> Result<Disposition, SessionError> {
    if payload.len() < GENL_HDRLEN {
        return Err(SessionError::MalformedResponse(format!(
            "generic netlink header truncated ({} bytes)",
            payload.len()
        )));
    }

    let genl = read_struct::<GenlMsgHdr>(payload).ok_or_else(|| {
        SessionError::MalformedResponse("generic netlink header truncated".to_string())
    })?;

    if genl.cmd != command.code() {
        return Ok(Disposition::CommandMismatch);
    }

    let raw = parse_attributes(&payload[GENL_HDRLEN..])?;
    let parsed = ParsedMessage::from_raw(genl.cmd, &raw)
        .map_err(|e| SessionError::MalformedResponse(e.to_string()))?;

    match parsed.validate_mandatory(mandatory) {
        Ok(()) => Ok(Disposition::Validated(parsed)),
        Err(DecodeError::MissingAttribute(attr)) => Ok(Disposition::Rejected(attr)),
        Err(other) => Err(SessionError::MalformedResponse(other.to_string())),
    }
}

fn report(errno: i32, reporting: ErrorReporting) -> SessionError {
    if reporting == ErrorReporting::Print && errno != libc::EOPNOTSUPP {
        eprintln!("Error received: {}", strerror(errno));
        return SessionError::Reported(errno);
    }
    SessionError::Kernel(errno)
}

// ============================================================================
// RECEIVE LOOP
// ============================================================================

/// Read and dispatch replies until the exchange is over
///
/// # Errors
///
/// * `Reported(errno)` for an error message or a failed dump that was
///   printed, `Kernel(errno)` when it was not
/// * `Kernel(ENOBUFS)` when the kernel dropped replies
/// * `MalformedResponse` for undecodable replies
/// * `Socket` when `recv()` fails
/// * whatever the handler returns
pub fn receive<T, H>(
    transport: &T,
    handler: &mut H,
    reporting: ErrorReporting,
) -> Result<(), SessionError>
where
    T: Transport + ?Sized,
    H: ResponseHandler + ?Sized,
{
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let len = transport.recv(&mut buffer)?;
        if len == 0 {
            tracing::debug!("netlink peer closed the exchange");
            return handler.finish();
        }

        let mut multipart = false;

        for message in parse_netlink_messages(&buffer[..len])? {
            match message {
                NetlinkMessage::Data { header, payload } => {
                    multipart |= header.nlmsg_flags & NLM_F_MULTI != 0;

                    match classify(&payload, handler.command(), handler.mandatory())? {
                        Disposition::Validated(parsed) => {
                            if handler.handle(&parsed)? == Control::Stop {
                                tracing::trace!("handler stopped the exchange");
                                return Ok(());
                            }
                        }
                        Disposition::CommandMismatch => {
                            tracing::trace!(
                                expected = handler.command().code(),
                                "ignoring reply for another command"
                            );
                        }
                        Disposition::Rejected(attr) => {
                            tracing::debug!(%attr, "dropping reply without mandatory attribute");
                        }
                    }
                }

                NetlinkMessage::Error(0) => {
                    return handler.finish();
                }

                NetlinkMessage::Error(errno) => {
                    return Err(report(errno, reporting));
                }

                NetlinkMessage::Done(0) => {
                    return handler.finish();
                }

                NetlinkMessage::Done(errno) => {
                    return Err(report(errno, reporting));
                }

                NetlinkMessage::Overrun => {
                    tracing::warn!("netlink receive buffer overrun");
                    return Err(SessionError::Kernel(libc::ENOBUFS));
                }
            }
        }

        if !multipart {
            return handler.finish();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

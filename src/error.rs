//! Crate-wide error taxonomy
//!
//! Every subcommand error converts into `Error` so `main` can map it to a
//! diagnostic and exit code in one place.

use crate::strerror;
use crate::sysfs::SettingsError;
use std::io;

#[cfg(target_os = "linux")]
use crate::interface::InterfaceError;
#[cfg(target_os = "linux")]
use crate::netlink::dispatch::SessionError;
#[cfg(target_os = "linux")]
use crate::tcpdump::CaptureError;
#[cfg(target_os = "linux")]
use crate::tp_meter::TpError;

#[cfg(all(target_os = "linux", feature = "legacy_debugfs"))]
use crate::debugfs::DebugfsError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad command line; the usage text follows the message
    #[error("{message}")]
    Usage { message: String, usage: String },

    /// Named interface does not exist
    #[error("Error - interface {0} is unknown")]
    Device(String),

    /// Mesh interface without a batman-adv settings directory
    #[error("Error - interface {0} is not present or not a batman-adv interface")]
    NotMeshIface(String),

    /// Neither an address nor a bat-hosts name
    #[error("Error - mac address or bat-host name could not be resolved: {0}")]
    Unresolved(String),

    /// Kernel module without the batadv netlink family
    #[error("Error - batman-adv netlink interface is not available: {0}")]
    ProtocolUnsupported(String),

    /// Errno reported by the kernel
    #[error("Error - {}", strerror(.0.abs()))]
    Kernel(i32),

    /// Kernel errno the dispatcher already printed as `Error received`
    #[error("Error - {}", strerror(.0.abs()))]
    Reported(i32),

    #[error("Received invalid data from kernel.")]
    MalformedResponse(String),

    /// Lookup found no matching entry
    #[error("Error - no matching entry found")]
    NotFound,

    #[error("Error - {0}")]
    Settings(#[from] SettingsError),

    #[cfg(target_os = "linux")]
    #[error("{0}")]
    Tp(#[from] TpError),

    #[cfg(target_os = "linux")]
    #[error("{0}")]
    Interface(#[from] InterfaceError),

    #[cfg(target_os = "linux")]
    #[error("{0}")]
    Capture(#[from] CaptureError),

    #[cfg(all(target_os = "linux", feature = "legacy_debugfs"))]
    #[error("Error - {0}")]
    Debugfs(#[from] DebugfsError),

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Error {
    #[must_use]
    pub fn usage(message: impl Into<String>, usage: impl Into<String>) -> Self {
        Error::Usage {
            message: message.into(),
            usage: usage.into(),
        }
    }

    /// Whether the kernel lacks the netlink interface for the request
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        match self {
            Error::ProtocolUnsupported(_) => true,
            Error::Kernel(errno) | Error::Reported(errno) => *errno == libc::EOPNOTSUPP,
            _ => false,
        }
    }

    /// Usage text to print after the message, if any
    #[must_use]
    pub fn usage_text(&self) -> Option<&str> {
        match self {
            Error::Usage { usage, .. } => Some(usage),
            #[cfg(target_os = "linux")]
            Error::Interface(e) if e.is_usage() => Some(crate::interface::USAGE),
            _ => None,
        }
    }

    /// Whether a message was already printed where the failure happened
    #[must_use]
    pub fn is_reported(&self) -> bool {
        matches!(self, Error::Reported(_))
    }
}

#[cfg(target_os = "linux")]
impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::MalformedResponse(detail) => Error::MalformedResponse(detail),
            SessionError::InvalidEncoding(detail) => Error::MalformedResponse(detail.to_string()),
            SessionError::MissingAttributes(attr) => {
                Error::MalformedResponse(format!("missing attribute {attr}"))
            }
            SessionError::ProtocolUnsupported(family) => Error::ProtocolUnsupported(family),
            SessionError::UnknownInterface(name) => Error::Device(name),
            SessionError::NotFound => Error::NotFound,
            SessionError::Kernel(errno) => Error::Kernel(errno),
            SessionError::Reported(errno) => Error::Reported(errno),
            SessionError::Socket(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            SessionError::Io(e) => Error::Io(e),
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::netlink::batadv::Attr;

    #[test]
    fn test_session_errors_map_to_taxonomy() {
        let err = Error::from(SessionError::MalformedResponse("short".to_string()));
        assert_eq!(err.to_string(), "Received invalid data from kernel.");

        let err = Error::from(SessionError::MissingAttributes(Attr::MeshIfname));
        assert!(matches!(err, Error::MalformedResponse(_)));

        let err = Error::from(SessionError::UnknownInterface("bat9".to_string()));
        assert_eq!(err.to_string(), "Error - interface bat9 is unknown");

        let err = Error::from(SessionError::Kernel(libc::EOPNOTSUPP));
        assert!(err.is_not_supported());
        assert!(!err.is_reported());

        let err = Error::from(SessionError::Reported(libc::ENODEV));
        assert!(err.is_reported());
    }

    #[test]
    fn test_usage_carries_text() {
        let err = Error::usage("Error - unrecognised option '-t'", "Usage: batctl neighbors\n");
        assert_eq!(err.to_string(), "Error - unrecognised option '-t'");
        assert_eq!(err.usage_text(), Some("Usage: batctl neighbors\n"));
        assert!(!err.is_not_supported());
    }
}

//! Netlink plumbing for the batman-adv kernel module
//!
//! This module provides native Linux netlink communication with the
//! `batadv` generic netlink family and with rtnetlink for link management.
//!
//! # Architecture
//!
//! ## Wire layer
//! - `structures`: Binary structures matching kernel layout (repr(C))
//! - `batadv`: Family name, command codes, attribute ids, result codes
//! - `socket`: Low-level netlink socket management (syscalls, RAII)
//! - `message`: Request construction and datagram splitting
//!
//! ## Protocol layer
//! - `policy`: Attribute codec (validation + decoding)
//! - `dispatch`: Per-message classification and handler invocation
//! - `genl`: Family and multicast group resolution
//! - `session`: Query sessions, mesh info header, watch loop
//! - `tables`: Typed table records and their rendering
//! - `rtnl`: Link dump, creation, deletion and master assignment
//!
//! # Educational Notes
//!
//! ## Layering
//!
//! ```text
//! tables / tp_meter / interface
//!          │
//!       session ──── genl
//!          │
//!       dispatch ─── policy
//!          │
//!   message ── socket ── structures
//! ```
//!
//! Everything above `socket` is generic over the `Transport` trait, so the
//! protocol layer can be exercised with scripted kernel replies.
//!
//! ## Conditional Compilation
//!
//! Netlink is a Linux-specific kernel interface. The socket and everything
//! that drives it compile only on Linux; the binary layouts, the codec and
//! the uapi constants stay portable for testing.

// ============================================================================
// SUBMODULE DECLARATIONS
// ============================================================================

// Wire layer
pub mod batadv; // batman-adv uapi (cross-platform)
#[cfg(target_os = "linux")]
pub mod message; // Message construction and parsing
#[cfg(target_os = "linux")]
pub mod socket; // Netlink socket management (Linux only)
pub mod structures; // Binary protocol structures (cross-platform for testing)

// Protocol layer
#[cfg(target_os = "linux")]
pub mod dispatch; // Response dispatcher
#[cfg(target_os = "linux")]
pub mod genl; // Family resolution
pub mod policy; // Attribute codec
#[cfg(target_os = "linux")]
pub mod rtnl; // rtnetlink link management
#[cfg(target_os = "linux")]
pub mod session; // Query sessions
#[cfg(target_os = "linux")]
pub mod tables; // Mesh tables

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

pub use batadv::{Attr, Command, TpReason};
pub use policy::{AttrValue, AttributeSpec, DecodeError, ParsedMessage, WireType};

#[cfg(target_os = "linux")]
pub use dispatch::{Control, Disposition, ErrorReporting, ResponseHandler, SessionError};
#[cfg(target_os = "linux")]
pub use message::GenlRequest;
#[cfg(target_os = "linux")]
pub use session::{GenlSession, MeshInfo};
#[cfg(target_os = "linux")]
pub use socket::{NetlinkProtocol, NetlinkSocket, SocketError, Transport};
#[cfg(target_os = "linux")]
pub use tables::{DebugTable, TableFlags};

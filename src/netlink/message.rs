//! Netlink message construction and parsing
//!
//! This module builds generic netlink and rtnetlink request messages and
//! splits the kernel's datagrams back into individual messages.
//!
//! # Educational Notes
//!
//! ## Message Format
//!
//! A batadv request is three layers deep:
//! ```text
//! ┌─────────────────────────────┐
//! │ NlMsgHdr (16 bytes)         │  ← type = resolved family id
//! ├─────────────────────────────┤
//! │ GenlMsgHdr (4 bytes)        │  ← command + version 1
//! ├─────────────────────────────┤
//! │ NlAttr + payload + padding  │  ← MESH_IFINDEX (always)
//! │ NlAttr + payload + padding  │  ← optional HARD_IFINDEX / ORIG_ADDRESS / ...
//! └─────────────────────────────┘
//! ```
//!
//! Every attribute starts on a 4-byte boundary. A 6-byte hardware
//! address therefore occupies 4 + 6 + 2 bytes of padding on the wire.
//!
//! ## Single reply vs. dump
//!
//! Table listings set `NLM_F_DUMP`. The kernel then answers with a series
//! of `NLM_F_MULTI` messages spread over several datagrams and closes the
//! series with `NLMSG_DONE`:
//! ```text
//! [ record ] [ record ] ... [ record ] [ NLMSG_DONE ]
//! ```
//! Single-shot requests (mesh info, tp meter start) get exactly one reply
//! message, or an `NLMSG_ERROR` carrying a negative errno.

use crate::MacAddr;
use crate::netlink::batadv::{Attr, BATADV_GENL_VERSION, Command};
use crate::netlink::structures::*;
use std::collections::HashMap;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that can occur while splitting a datagram into messages
#[derive(Debug)]
pub struct MessageError {
    message: String,
}

impl MessageError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MessageError {}

// ============================================================================
// MESSAGE CONSTRUCTION
// ============================================================================

/// Incremental writer for one netlink message
///
/// The header length is patched in `finish()`, nested attribute lengths in
/// `end_nested()`.
///
/// # Example
///
/// ```
/// use batctl::netlink::message::MessageBuilder;
/// use batctl::netlink::structures::*;
///
/// let mut builder = MessageBuilder::new(GENL_ID_CTRL, NLM_F_REQUEST, 1);
/// builder.put_genl_header(CTRL_CMD_GETFAMILY, 1);
/// builder.put_string(CTRL_ATTR_FAMILY_NAME, "batadv");
/// let message = builder.finish();
/// assert_eq!(message.len() % 4, 0);
/// ```
#[derive(Debug)]
pub struct MessageBuilder {
    buffer: Vec<u8>,
}

impl MessageBuilder {
    /// Start a message with the given netlink type, flags and sequence
    #[must_use]
    pub fn new(msg_type: u16, flags: u16, seq: u32) -> Self {
        let nlh = NlMsgHdr {
            nlmsg_len: 0, // patched in finish()
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: seq,
            nlmsg_pid: 0, // Kernel fills in our port id
        };

        let mut buffer = Vec::with_capacity(nlmsg_space(64));
        buffer.extend_from_slice(struct_bytes(&nlh));
        Self { buffer }
    }

    /// Append the generic netlink header
    pub fn put_genl_header(&mut self, cmd: u8, version: u8) {
        let genl = GenlMsgHdr {
            cmd,
            version,
            reserved: 0,
        };
        self.put_struct(&genl);
    }

    /// Append a fixed family header such as `IfInfoMsg`
    pub fn put_struct<T: Copy>(&mut self, value: &T) {
        self.buffer.extend_from_slice(struct_bytes(value));
        self.pad();
    }

    /// Append one attribute with a raw payload
    pub fn put_attr(&mut self, attr_type: u16, payload: &[u8]) {
        let nla = NlAttr {
            nla_len: nla_length(payload.len()),
            nla_type: attr_type,
        };
        self.buffer.extend_from_slice(struct_bytes(&nla));
        self.buffer.extend_from_slice(payload);
        self.pad();
    }

    pub fn put_u8(&mut self, attr_type: u16, value: u8) {
        self.put_attr(attr_type, &[value]);
    }

    pub fn put_u16(&mut self, attr_type: u16, value: u16) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    pub fn put_u32(&mut self, attr_type: u16, value: u32) {
        self.put_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a NUL-terminated string attribute
    pub fn put_string(&mut self, attr_type: u16, value: &str) {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_attr(attr_type, &payload);
    }

    /// Open a nested attribute; returns the offset to hand to `end_nested`
    pub fn begin_nested(&mut self, attr_type: u16) -> usize {
        let start = self.buffer.len();
        let nla = NlAttr {
            nla_len: 0,
            nla_type: attr_type | NLA_F_NESTED,
        };
        self.buffer.extend_from_slice(struct_bytes(&nla));
        start
    }

    /// Close a nested attribute opened at `start`
    pub fn end_nested(&mut self, start: usize) {
        let len = (self.buffer.len() - start) as u16;
        self.buffer[start..start + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// Patch the total length and return the finished message
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.pad();
        let len = self.buffer.len() as u32;
        self.buffer[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buffer
    }

    fn pad(&mut self) {
        while self.buffer.len() % 4 != 0 {
            self.buffer.push(0);
        }
    }
}

/// Outbound batadv request
///
/// Always carries `MESH_IFINDEX`; the optional fields are only stamped when
/// set. Dump requests (table listings, routing algorithm enumeration) set
/// `NLM_F_DUMP`, single-shot requests do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenlRequest {
    pub command: Command,
    pub mesh_ifindex: u32,
    pub hard_ifindex: Option<u32>,
    pub orig_address: Option<MacAddr>,
    pub test_time_ms: Option<u32>,
    pub dump: bool,
}

impl GenlRequest {
    /// Single-shot request for `command` on the given mesh interface
    #[must_use]
    pub fn new(command: Command, mesh_ifindex: u32) -> Self {
        Self {
            command,
            mesh_ifindex,
            hard_ifindex: None,
            orig_address: None,
            test_time_ms: None,
            dump: false,
        }
    }

    /// Multi-record dump request for `command`
    #[must_use]
    pub fn dump(command: Command, mesh_ifindex: u32) -> Self {
        Self {
            dump: true,
            ..Self::new(command, mesh_ifindex)
        }
    }

    #[must_use]
    pub fn with_hard_ifindex(mut self, hard_ifindex: Option<u32>) -> Self {
        self.hard_ifindex = hard_ifindex;
        self
    }

    #[must_use]
    pub fn with_orig_address(mut self, address: MacAddr) -> Self {
        self.orig_address = Some(address);
        self
    }

    #[must_use]
    pub fn with_test_time(mut self, millis: u32) -> Self {
        self.test_time_ms = Some(millis);
        self
    }

    /// Netlink header flags for this request
    #[must_use]
    pub fn flags(&self) -> u16 {
        if self.dump {
            NLM_F_REQUEST | NLM_F_DUMP
        } else {
            NLM_F_REQUEST
        }
    }

    /// Serialize the request for the family id resolved at runtime
    #[must_use]
    pub fn build(&self, family: u16, seq: u32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(family, self.flags(), seq);
        builder.put_genl_header(self.command.code(), BATADV_GENL_VERSION);
        builder.put_u32(Attr::MeshIfindex.id(), self.mesh_ifindex);

        if let Some(hard_ifindex) = self.hard_ifindex {
            builder.put_u32(Attr::HardIfindex.id(), hard_ifindex);
        }
        if let Some(address) = self.orig_address {
            builder.put_attr(Attr::OrigAddress.id(), address.as_bytes());
        }
        if let Some(millis) = self.test_time_ms {
            builder.put_u32(Attr::TpmeterTestTime.id(), millis);
        }

        builder.finish()
    }
}

// ============================================================================
// MESSAGE PARSING
// ============================================================================

/// One message split out of a received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetlinkMessage {
    /// Family-specific message: the header plus everything after it
    Data { header: NlMsgHdr, payload: Vec<u8> },

    /// End of a dump; carries the (positive) errno the kernel reported, 0 if none
    Done(i32),

    /// `NLMSG_ERROR`; positive errno, 0 for an acknowledgment
    Error(i32),

    /// The kernel dropped messages because our receive buffer overflowed
    Overrun,
}

/// Split a datagram into netlink messages
///
/// `NLMSG_NOOP` messages are skipped. Parsing stops after `NLMSG_DONE`.
///
/// # Errors
///
/// Returns `MessageError` if a message header claims a length that is too
/// small or runs past the end of the datagram.
pub fn parse_netlink_messages(data: &[u8]) -> Result<Vec<NetlinkMessage>, MessageError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset + NLMSG_HDRLEN <= data.len() {
        let Some(nlh) = read_struct::<NlMsgHdr>(&data[offset..]) else {
            break;
        };

        let msg_len = nlh.nlmsg_len as usize;

        // === Validate message length ===
        if msg_len < NLMSG_HDRLEN {
            return Err(MessageError::new(format!(
                "Invalid message length: {} (minimum is {})",
                msg_len, NLMSG_HDRLEN
            )));
        }

        if offset + msg_len > data.len() {
            return Err(MessageError::new(format!(
                "Message length {} exceeds buffer size (offset={}, buffer={})",
                msg_len,
                offset,
                data.len()
            )));
        }

        let body = &data[offset + NLMSG_HDRLEN..offset + msg_len];

        match nlh.nlmsg_type {
            NLMSG_NOOP => {}

            NLMSG_DONE => {
                // The payload is an int error; old kernels send none.
                let errno = read_errno(body).unwrap_or(0);
                messages.push(NetlinkMessage::Done(errno));
                break;
            }

            NLMSG_ERROR => {
                let errno = read_errno(body).ok_or_else(|| {
                    MessageError::new("Error message too small".to_string())
                })?;
                messages.push(NetlinkMessage::Error(errno));
            }

            NLMSG_OVERRUN => messages.push(NetlinkMessage::Overrun),

            _ => messages.push(NetlinkMessage::Data {
                header: nlh,
                payload: body.to_vec(),
            }),
        }

        offset += nlmsg_align(msg_len);
    }

    Ok(messages)
}

/// Read the kernel's negative errno and return it as a positive number
fn read_errno(body: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = body.get(0..4)?.try_into().ok()?;
    Some(-i32::from_ne_bytes(bytes))
}

/// Parse attributes (TLV format) from a message tail
///
/// Nested/byte-order flag bits are masked off the type. When the kernel
/// repeats an attribute the last occurrence wins.
///
/// # Errors
///
/// Returns `MessageError` if an attribute runs past the end of `data`.
pub fn parse_attributes(data: &[u8]) -> Result<HashMap<u16, Vec<u8>>, MessageError> {
    let mut attrs = HashMap::new();
    for (attr_type, payload) in attribute_list(data)? {
        attrs.insert(attr_type, payload.to_vec());
    }
    Ok(attrs)
}

/// Parse attributes in wire order, borrowing the payloads
///
/// Used for nested lists (multicast groups) where order and duplicates
/// matter.
///
/// # Errors
///
/// Returns `MessageError` if an attribute runs past the end of `data`.
pub fn attribute_list(data: &[u8]) -> Result<Vec<(u16, &[u8])>, MessageError> {
    let mut attrs = Vec::new();
    let mut offset = 0;

    while offset + NLA_HDRLEN <= data.len() {
        let Some(nla) = read_struct::<NlAttr>(&data[offset..]) else {
            break;
        };

        let attr_len = nla.nla_len as usize;

        // A length below the header size marks trailing padding.
        if attr_len < NLA_HDRLEN {
            break;
        }

        if offset + attr_len > data.len() {
            return Err(MessageError::new(format!(
                "Attribute length {} exceeds buffer (offset={}, buffer={})",
                attr_len,
                offset,
                data.len()
            )));
        }

        attrs.push((
            nla.nla_type & NLA_TYPE_MASK,
            &data[offset + NLA_HDRLEN..offset + attr_len],
        ));

        offset += nla_align(attr_len);
    }

    Ok(attrs)
}

// ============================================================================
// TESTS
// ============================================================================

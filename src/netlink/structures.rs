//! Binary structures for generic netlink and rtnetlink
//!
//! These structures use `#[repr(C)]` to match kernel layout exactly.
//! All multi-byte integers are in host byte order, which is what netlink
//! headers and the batadv attributes use (the one exception, the DAT cache
//! IPv4 address, is decoded where it is consumed).

// NETLINK MESSAGE HEADER

/// Netlink message header (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

// GENERIC NETLINK HEADER

/// Generic netlink header (4 bytes), follows `NlMsgHdr`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenlMsgHdr {
    pub cmd: u8,
    pub version: u8,
    pub reserved: u16,
}

// NETLINK ATTRIBUTE HEADER

/// Netlink attribute header (4 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlAttr {
    pub nla_len: u16,
    pub nla_type: u16,
}

// RTNETLINK LINK MESSAGE

/// `ifinfomsg` (16 bytes), payload of RTM_*LINK messages
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfInfoMsg {
    pub ifi_family: u8,
    pub ifi_pad: u8,
    pub ifi_type: u16,
    pub ifi_index: i32,
    pub ifi_flags: u32,
    pub ifi_change: u32,
}

// CONSTANTS

// Netlink message types
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;

// Netlink flags
pub const NLM_F_REQUEST: u16 = 1;
pub const NLM_F_MULTI: u16 = 2;
pub const NLM_F_ACK: u16 = 4;

// Request flags
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW requests
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;

// Attribute type flags
pub const NLA_F_NESTED: u16 = 0x8000;
pub const NLA_F_NET_BYTEORDER: u16 = 0x4000;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// Generic netlink controller
pub const GENL_ID_CTRL: u16 = 0x10;
pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;
pub const CTRL_ATTR_MCAST_GROUPS: u16 = 7;
pub const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
pub const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;

// rtnetlink link messages
pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_GETLINK: u16 = 18;
pub const RTM_SETLINK: u16 = 19;

// rtnetlink link attributes
pub const IFLA_IFNAME: u16 = 3;
pub const IFLA_LINK: u16 = 5;
pub const IFLA_MASTER: u16 = 10;
pub const IFLA_LINKINFO: u16 = 18;
pub const IFLA_INFO_KIND: u16 = 1;
pub const IFLA_INFO_DATA: u16 = 2;
pub const IFLA_VLAN_ID: u16 = 1;

/// Maximum interface name length including the terminating NUL
pub const IFNAMSIZ: usize = 16;

/// Hardware address length
pub const ETH_ALEN: usize = 6;

// HELPER FUNCTIONS

/// Align length to 4-byte boundary
#[must_use]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Length of the aligned netlink header
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Length of the aligned generic netlink header
pub const GENL_HDRLEN: usize = nlmsg_align(std::mem::size_of::<GenlMsgHdr>());

/// Length of the aligned attribute header
pub const NLA_HDRLEN: usize = nla_align(std::mem::size_of::<NlAttr>());

/// Calculate Netlink message length
#[must_use]
pub const fn nlmsg_length(payload_len: usize) -> u32 {
    (NLMSG_HDRLEN + payload_len) as u32
}

/// Calculate space needed for Netlink message
#[must_use]
pub const fn nlmsg_space(payload_len: usize) -> usize {
    nlmsg_align(NLMSG_HDRLEN + payload_len)
}

/// Align attribute length to 4-byte boundary
#[must_use]
pub const fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Calculate attribute length
#[must_use]
pub const fn nla_length(payload_len: usize) -> u16 {
    (std::mem::size_of::<NlAttr>() + payload_len) as u16
}

/// Calculate space needed for attribute
#[must_use]
pub const fn nla_space(payload_len: usize) -> usize {
    nla_align(std::mem::size_of::<NlAttr>() + payload_len)
}

/// View a plain `#[repr(C)]` header as its raw bytes.
///
/// Only used for the POD header structs of this module.
pub(crate) fn struct_bytes<T: Copy>(value: &T) -> &[u8] {
    // SAFETY: the header structs are repr(C), contain only integers and
    // have no padding, so every byte of the value is initialised.
    unsafe {
        std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
    }
}

/// Read a plain `#[repr(C)]` header from the front of `data`.
///
/// Returns `None` when `data` is too short.
pub(crate) fn read_struct<T: Copy>(data: &[u8]) -> Option<T> {
    if data.len() < std::mem::size_of::<T>() {
        return None;
    }

    // SAFETY: length checked above, read_unaligned copes with any
    // alignment, and all bit patterns are valid for the integer-only
    // header structs.
    Some(unsafe { std::ptr::read_unaligned(data.as_ptr() as *const T) })
}

// TESTS

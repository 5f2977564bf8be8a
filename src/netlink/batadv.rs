//! batman-adv generic netlink uapi
//!
//! Command codes, attribute ids and result codes exchanged with the
//! `batadv` generic netlink family. Numeric values follow the ordering of
//! the kernel's `batman_adv.h` enums and must never be renumbered.

use std::fmt;

/// Generic netlink family name registered by the kernel module
pub const BATADV_NL_NAME: &str = "batadv";

/// Multicast group carrying asynchronous tp meter results
pub const BATADV_NL_MCAST_GROUP_TPMETER: &str = "tpmeter";

/// Generic netlink version stamped on every request
pub const BATADV_GENL_VERSION: u8 = 1;

/// VLAN id flag set by the kernel for tagged entries
pub const BATADV_VLAN_HAS_TAG: u16 = 1 << 15;

/// Mask extracting the 802.1Q VLAN id
pub const VLAN_VID_MASK: u16 = 0x0fff;

/// Render a kernel VLAN id the way the tables print it: -1 when untagged.
#[must_use]
pub fn print_vid(vid: u16) -> i32 {
    if vid & BATADV_VLAN_HAS_TAG != 0 {
        i32::from(vid & VLAN_VID_MASK)
    } else {
        -1
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// `enum batadv_nl_commands`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetMeshInfo = 1,
    TpMeter = 2,
    TpMeterCancel = 3,
    GetRoutingAlgos = 4,
    GetHardifs = 5,
    GetTranstableLocal = 6,
    GetTranstableGlobal = 7,
    GetOriginators = 8,
    GetNeighbors = 9,
    GetGateways = 10,
    GetBlaClaim = 11,
    GetBlaBackbone = 12,
    GetDatCache = 13,
    GetMcastFlags = 14,
}

impl Command {
    /// Wire value
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// ATTRIBUTES
// ============================================================================

/// `enum batadv_nl_attrs`
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attr {
    Version = 1,
    AlgoName = 2,
    MeshIfindex = 3,
    MeshIfname = 4,
    MeshAddress = 5,
    HardIfindex = 6,
    HardIfname = 7,
    HardAddress = 8,
    OrigAddress = 9,
    TpmeterResult = 10,
    TpmeterTestTime = 11,
    TpmeterBytes = 12,
    TpmeterCookie = 13,
    Pad = 14,
    Active = 15,
    TtAddress = 16,
    TtTtvn = 17,
    TtLastTtvn = 18,
    TtCrc32 = 19,
    TtVid = 20,
    TtFlags = 21,
    FlagBest = 22,
    LastSeenMsecs = 23,
    NeighAddress = 24,
    Tq = 25,
    Throughput = 26,
    BandwidthUp = 27,
    BandwidthDown = 28,
    Router = 29,
    BlaOwn = 30,
    BlaAddress = 31,
    BlaVid = 32,
    BlaBackbone = 33,
    BlaCrc = 34,
    DatCacheIp4address = 35,
    DatCacheHwaddress = 36,
    DatCacheVid = 37,
    McastFlags = 38,
    McastFlagsPriv = 39,
}

/// Highest attribute id understood by this tool
pub const BATADV_ATTR_MAX: u16 = Attr::McastFlagsPriv as u16;

impl Attr {
    /// All attributes in id order
    pub const ALL: [Attr; BATADV_ATTR_MAX as usize] = [
        Attr::Version,
        Attr::AlgoName,
        Attr::MeshIfindex,
        Attr::MeshIfname,
        Attr::MeshAddress,
        Attr::HardIfindex,
        Attr::HardIfname,
        Attr::HardAddress,
        Attr::OrigAddress,
        Attr::TpmeterResult,
        Attr::TpmeterTestTime,
        Attr::TpmeterBytes,
        Attr::TpmeterCookie,
        Attr::Pad,
        Attr::Active,
        Attr::TtAddress,
        Attr::TtTtvn,
        Attr::TtLastTtvn,
        Attr::TtCrc32,
        Attr::TtVid,
        Attr::TtFlags,
        Attr::FlagBest,
        Attr::LastSeenMsecs,
        Attr::NeighAddress,
        Attr::Tq,
        Attr::Throughput,
        Attr::BandwidthUp,
        Attr::BandwidthDown,
        Attr::Router,
        Attr::BlaOwn,
        Attr::BlaAddress,
        Attr::BlaVid,
        Attr::BlaBackbone,
        Attr::BlaCrc,
        Attr::DatCacheIp4address,
        Attr::DatCacheHwaddress,
        Attr::DatCacheVid,
        Attr::McastFlags,
        Attr::McastFlagsPriv,
    ];

    /// Wire value
    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Map a wire id back to an attribute; `None` for ids newer kernels
    /// may send that this tool does not know.
    #[must_use]
    pub fn from_id(id: u16) -> Option<Self> {
        if id == 0 || id > BATADV_ATTR_MAX {
            return None;
        }
        Some(Self::ALL[usize::from(id - 1)])
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}

// ============================================================================
// TP METER RESULT CODES
// ============================================================================

/// `enum batadv_tp_meter_reason`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpReason {
    Complete,
    Cancel,
    DstUnreachable,
    ResendLimit,
    AlreadyOngoing,
    MemoryError,
    CantSend,
    TooMany,
    Unrecognized(u8),
}

impl From<u8> for TpReason {
    fn from(value: u8) -> Self {
        match value {
            1 => TpReason::Complete,
            2 => TpReason::Cancel,
            128 => TpReason::DstUnreachable,
            129 => TpReason::ResendLimit,
            130 => TpReason::AlreadyOngoing,
            131 => TpReason::MemoryError,
            132 => TpReason::CantSend,
            133 => TpReason::TooMany,
            other => TpReason::Unrecognized(other),
        }
    }
}

impl TpReason {
    /// Wire value
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            TpReason::Complete => 1,
            TpReason::Cancel => 2,
            TpReason::DstUnreachable => 128,
            TpReason::ResendLimit => 129,
            TpReason::AlreadyOngoing => 130,
            TpReason::MemoryError => 131,
            TpReason::CantSend => 132,
            TpReason::TooMany => 133,
            TpReason::Unrecognized(code) => code,
        }
    }
}

// ============================================================================
// TRANSLATION TABLE CLIENT FLAGS
// ============================================================================

pub const BATADV_TT_CLIENT_DEL: u32 = 1 << 0;
pub const BATADV_TT_CLIENT_ROAM: u32 = 1 << 1;
pub const BATADV_TT_CLIENT_WIFI: u32 = 1 << 4;
pub const BATADV_TT_CLIENT_ISOLA: u32 = 1 << 5;
pub const BATADV_TT_CLIENT_NOPURGE: u32 = 1 << 8;
pub const BATADV_TT_CLIENT_NEW: u32 = 1 << 9;
pub const BATADV_TT_CLIENT_PENDING: u32 = 1 << 10;
pub const BATADV_TT_CLIENT_TEMP: u32 = 1 << 11;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_ids_match_table_order() {
        for (index, attr) in Attr::ALL.iter().enumerate() {
            assert_eq!(attr.id() as usize, index + 1);
            assert_eq!(Attr::from_id(attr.id()), Some(*attr));
        }
        assert_eq!(Attr::from_id(0), None);
        assert_eq!(Attr::from_id(BATADV_ATTR_MAX + 1), None);
    }

    #[test]
    fn test_well_known_ids() {
        assert_eq!(Attr::MeshIfindex.id(), 3);
        assert_eq!(Attr::TpmeterCookie.id(), 13);
        assert_eq!(Attr::FlagBest.id(), 22);
        assert_eq!(Command::GetOriginators.code(), 8);
        assert_eq!(Command::TpMeterCancel.code(), 3);
    }

    #[test]
    fn test_tp_reason_codes() {
        assert_eq!(TpReason::from(1), TpReason::Complete);
        assert_eq!(TpReason::from(128), TpReason::DstUnreachable);
        assert_eq!(TpReason::from(133), TpReason::TooMany);
        assert_eq!(TpReason::from(7), TpReason::Unrecognized(7));
        assert_eq!(TpReason::TooMany.code(), 133);
    }

    #[test]
    fn test_print_vid() {
        assert_eq!(print_vid(0), -1);
        assert_eq!(print_vid(BATADV_VLAN_HAS_TAG | 5), 5);
        assert_eq!(print_vid(BATADV_VLAN_HAS_TAG), 0);
    }
}

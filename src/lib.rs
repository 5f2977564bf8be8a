// ============================================================================
// BATCTL LIBRARY
// ============================================================================
// This library is the control and diagnostic client for the batman-adv mesh
// kernel module. It talks to the module in two ways:
// 1. Generic netlink requests and dumps against the `batadv` family
// 2. Text attribute files under /sys/class/net and /sys/module
//
// === KEY FEATURES ===
// 1. Mesh tables (originators, neighbors, translation tables, gateways,
//    bridge loop avoidance, DAT cache) with a continuous "watch" mode
// 2. Throughput meter: start a test, wait for the asynchronous result
// 3. Settings, gateway mode, log level and routing algorithm
// 4. Interface membership through rtnetlink
// 5. Raw batman-adv frame capture
//
// === KERNEL MODULE AS COLLABORATOR ===
// Routing, translation table synchronisation and the throughput
// measurement itself run inside the kernel. Everything here is request,
// decode and print.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// COMPILE-TIME FEATURE VALIDATION
// ============================================================================
//
// Tables are read either over netlink or from the debugfs files of older
// kernel modules. Without either path there is nothing to print.

#[cfg(not(any(feature = "netlink", feature = "legacy_debugfs")))]
compile_error!(
    "At least one table backend must be enabled!\n\
     \n\
     Available options:\n\
     1. Netlink (RECOMMENDED): cargo build --features netlink\n\
     2. Legacy debugfs (old kernels): cargo build --features legacy_debugfs\n\
     3. Both (default): cargo build --features netlink,legacy_debugfs"
);

// === MODULE DECLARATIONS ===
pub mod bat_hosts;
pub mod error;
pub mod netlink;
pub mod sysfs;

#[cfg(target_os = "linux")]
pub mod interface;
#[cfg(target_os = "linux")]
pub mod tcpdump;
#[cfg(target_os = "linux")]
pub mod tp_meter;

#[cfg(all(target_os = "linux", feature = "legacy_debugfs"))]
pub mod debugfs;

pub use error::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Mesh interface used when neither `-m` nor `BATCTL_MESHIF` is given
pub const DEFAULT_MESH_IFACE: &str = "bat0";

/// Environment variable overriding the default mesh interface
pub const MESH_IFACE_ENV: &str = "BATCTL_MESHIF";

/// Default watch interval in seconds
pub const DEFAULT_WATCH_INTERVAL: f32 = 1.0;

// ============================================================================
// HARDWARE ADDRESS
// ============================================================================

/// 48-bit Ethernet hardware address
///
/// Displays as lowercase `aa:bb:cc:dd:ee:ff`. Parsing follows
/// `ether_aton()`: six colon separated hex octets of one or two digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// Build from a 6-byte slice; `None` for any other length
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.try_into().ok()?;
        Some(MacAddr(octets))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Group bit of the first octet (multicast and broadcast)
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        let text = format!("{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}");
        // Honour width/alignment so tables can pad addresses
        f.pad(&text)
    }
}

/// Error for strings that are not hardware addresses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address: {0}")]
pub struct ParseMacError(pub String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in &mut octets {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.is_empty() || part.len() > 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }

        Ok(MacAddr(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// QUERY OPTIONS
// ============================================================================

/// Bitset of table read options
///
/// === WHY A NEWTYPE ===
/// The flags travel through the session, the table renderers and the
/// debugfs fallback. A newtype keeps them from being mixed up with the
/// netlink header flags that are also plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFlags(u32);

impl ReadFlags {
    pub const USE_BAT_HOSTS: ReadFlags = ReadFlags(1 << 0);
    pub const CONT_READ: ReadFlags = ReadFlags(1 << 1);
    pub const CLR_CONT_READ: ReadFlags = ReadFlags(1 << 2);
    pub const SKIP_HEADER: ReadFlags = ReadFlags(1 << 3);
    pub const UNICAST_ONLY: ReadFlags = ReadFlags(1 << 4);
    pub const MULTICAST_ONLY: ReadFlags = ReadFlags(1 << 5);
    pub const NO_OLD_ORIGS: ReadFlags = ReadFlags(1 << 6);

    #[must_use]
    pub const fn empty() -> Self {
        ReadFlags(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: ReadFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ReadFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ReadFlags) {
        self.0 &= !other.0;
    }

    /// Watch mode: either flag keeps the table refreshing
    #[must_use]
    pub const fn is_continuous(self) -> bool {
        self.0 & (Self::CONT_READ.0 | Self::CLR_CONT_READ.0) != 0
    }
}

impl std::ops::BitOr for ReadFlags {
    type Output = ReadFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ReadFlags(self.0 | rhs.0)
    }
}

/// Options of one table invocation, built from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub mesh_iface: String,
    pub orig_iface: Option<String>,
    pub read_flags: ReadFlags,
    /// Seconds between watch rounds
    pub watch_interval: f32,
    /// Entries not seen for this many seconds are hidden (`-t`)
    pub orig_timeout: f32,
    /// Print records as JSON instead of the text table
    pub json: bool,
}

impl QueryOptions {
    #[must_use]
    pub fn new(mesh_iface: impl Into<String>) -> Self {
        Self {
            mesh_iface: mesh_iface.into(),
            orig_iface: None,
            read_flags: ReadFlags::USE_BAT_HOSTS,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            orig_timeout: 0.0,
            json: false,
        }
    }

    /// Sleep between two watch rounds
    #[must_use]
    pub fn watch_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.watch_interval).unwrap_or(Duration::ZERO)
    }

    /// Whether an entry last seen `last_seen_msecs` ago is too old to show
    #[must_use]
    pub fn is_stale(&self, last_seen_msecs: u32) -> bool {
        self.read_flags.contains(ReadFlags::NO_OLD_ORIGS)
            && f64::from(last_seen_msecs) > f64::from(self.orig_timeout) * 1000.0
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Text of an errno, as `strerror(3)` renders it
#[must_use]
pub fn strerror(errno: i32) -> String {
    std::io::Error::from_raw_os_error(errno)
        .to_string()
        .split(" (os error")
        .next()
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// UNIT TESTS MODULE
// ============================================================================
#[cfg(test)]
mod tests;

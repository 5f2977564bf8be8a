//! Mesh tables
//!
//! Every table is one `GET_*` dump. Each validated reply is decoded into a
//! typed record, filtered according to the read flags and printed either
//! as a line of the classic text table or collected for JSON output.
//!
//! # Educational Notes
//!
//! ## Algorithm dependent layouts
//!
//! B.A.T.M.A.N. IV rates links with a transmit quality (TQ, 0-255),
//! B.A.T.M.A.N. V with an estimated throughput in 100 kbit/s units. The
//! neighbor, originator and gateway tables therefore change both their
//! column header and their mandatory attributes with the algorithm the
//! mesh runs. The algorithm is taken from the mesh info once per
//! invocation; an algorithm this tool does not know is reported as "not
//! supported" so the caller can fall back to the debugfs files.

use crate::bat_hosts::BatHosts;
use crate::netlink::batadv::*;
use crate::netlink::dispatch::{Control, ErrorReporting, ResponseHandler, SessionError};
use crate::netlink::message::GenlRequest;
use crate::netlink::policy::ParsedMessage;
use crate::netlink::session::{
    GenlSession, InterfaceResolver, PendingHeader, require_index, watch,
};
use crate::netlink::socket::Transport;
use crate::{MacAddr, QueryOptions, ReadFlags};
use serde::Serialize;
use std::io::Write;
use std::net::Ipv4Addr;

// ============================================================================
// TABLE CATALOGUE
// ============================================================================

/// Options a table may or may not accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOption {
    /// `-t`: hide entries older than a timeout
    Timeout,
    /// `-i`: originator table of one hard interface
    OrigIface,
    /// `-u`
    UnicastOnly,
    /// `-m`
    MulticastOnly,
}

/// The listable mesh tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugTable {
    Neighbors,
    Originators,
    TransLocal,
    TransGlobal,
    Gateways,
    BlaClaim,
    BlaBackbone,
    DatCache,
}

impl DebugTable {
    pub const ALL: [DebugTable; 8] = [
        DebugTable::Neighbors,
        DebugTable::Originators,
        DebugTable::TransLocal,
        DebugTable::TransGlobal,
        DebugTable::Gateways,
        DebugTable::BlaClaim,
        DebugTable::BlaBackbone,
        DebugTable::DatCache,
    ];

    /// Long command name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DebugTable::Neighbors => "neighbors",
            DebugTable::Originators => "originators",
            DebugTable::TransLocal => "translocal",
            DebugTable::TransGlobal => "transglobal",
            DebugTable::Gateways => "gateways",
            DebugTable::BlaClaim => "claimtable",
            DebugTable::BlaBackbone => "backbonetable",
            DebugTable::DatCache => "dat_cache",
        }
    }

    /// Short command name
    #[must_use]
    pub const fn abbr(self) -> &'static str {
        match self {
            DebugTable::Neighbors => "n",
            DebugTable::Originators => "o",
            DebugTable::TransLocal => "tl",
            DebugTable::TransGlobal => "tg",
            DebugTable::Gateways => "gwl",
            DebugTable::BlaClaim => "cl",
            DebugTable::BlaBackbone => "bbt",
            DebugTable::DatCache => "dc",
        }
    }

    /// Look a table up by long or short name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|table| table.name() == name || table.abbr() == name)
    }

    #[must_use]
    pub const fn command(self) -> Command {
        match self {
            DebugTable::Neighbors => Command::GetNeighbors,
            DebugTable::Originators => Command::GetOriginators,
            DebugTable::TransLocal => Command::GetTranstableLocal,
            DebugTable::TransGlobal => Command::GetTranstableGlobal,
            DebugTable::Gateways => Command::GetGateways,
            DebugTable::BlaClaim => Command::GetBlaClaim,
            DebugTable::BlaBackbone => Command::GetBlaBackbone,
            DebugTable::DatCache => Command::GetDatCache,
        }
    }

    /// File of the same table below the debugfs mesh directory
    #[must_use]
    pub const fn debugfs_name(self) -> &'static str {
        match self {
            DebugTable::Neighbors => "neighbors",
            DebugTable::Originators => "originators",
            DebugTable::TransLocal => "transtable_local",
            DebugTable::TransGlobal => "transtable_global",
            DebugTable::Gateways => "gateways",
            DebugTable::BlaClaim => "bla_claim_table",
            DebugTable::BlaBackbone => "bla_backbone_table",
            DebugTable::DatCache => "dat_cache",
        }
    }

    /// Header lines of the debugfs file, skipped with `-H`
    #[must_use]
    pub const fn header_lines(self) -> usize {
        match self {
            DebugTable::Gateways => 1,
            _ => 2,
        }
    }

    #[must_use]
    pub const fn supports(self, option: TableOption) -> bool {
        matches!(
            (self, option),
            (DebugTable::Originators, TableOption::Timeout | TableOption::OrigIface)
                | (
                    DebugTable::TransLocal | DebugTable::TransGlobal,
                    TableOption::UnicastOnly | TableOption::MulticastOnly
                )
        )
    }

    /// Whether the layout depends on the routing algorithm
    #[must_use]
    pub const fn needs_algo(self) -> bool {
        matches!(
            self,
            DebugTable::Neighbors | DebugTable::Originators | DebugTable::Gateways
        )
    }

    /// Column header printed below the mesh info line
    #[must_use]
    pub fn static_header(self, algo: Option<RoutingAlgo>) -> &'static str {
        match (self, algo) {
            (DebugTable::Neighbors, Some(RoutingAlgo::V)) => {
                "  Neighbor   last-seen speed           IF\n"
            }
            (DebugTable::Neighbors, _) => "IF             Neighbor              last-seen\n",
            (DebugTable::Originators, Some(RoutingAlgo::V)) => {
                "   Originator        last-seen ( throughput)  Nexthop           [outgoingIF]\n"
            }
            (DebugTable::Originators, _) => {
                "   Originator        last-seen (#/255) Nexthop           [outgoingIF]\n"
            }
            (DebugTable::TransLocal, _) => "Client         VID Flags    Last seen (CRC       )\n",
            (DebugTable::TransGlobal, _) => {
                "   Client             VID  (TTVN)       Originator      (Curr TTVN) (CRC       ) Flags\n"
            }
            (DebugTable::Gateways, Some(RoutingAlgo::V)) => {
                "  Router            ( throughput) Next Hop          [outgoingIf]  Bandwidth\n"
            }
            (DebugTable::Gateways, _) => {
                "  Router            ( TQ) Next Hop          [outgoingIf]  Bandwidth\n"
            }
            (DebugTable::BlaClaim, _) => {
                "Client               VID      Originator        [o] (CRC   )\n"
            }
            (DebugTable::BlaBackbone, _) => "Originator           VID   last seen (CRC   )\n",
            (DebugTable::DatCache, _) => "          IPv4             MAC        VID   last-seen\n",
        }
    }

    /// Attributes every record of this table must carry
    #[must_use]
    pub fn mandatory(self, algo: Option<RoutingAlgo>) -> Vec<Attr> {
        let mut attrs = match self {
            DebugTable::Neighbors => vec![Attr::NeighAddress, Attr::HardIfindex, Attr::LastSeenMsecs],
            DebugTable::Originators => vec![
                Attr::OrigAddress,
                Attr::NeighAddress,
                Attr::HardIfindex,
                Attr::LastSeenMsecs,
            ],
            DebugTable::TransLocal => {
                vec![Attr::TtAddress, Attr::TtVid, Attr::TtCrc32, Attr::TtFlags]
            }
            DebugTable::TransGlobal => vec![
                Attr::TtAddress,
                Attr::OrigAddress,
                Attr::TtVid,
                Attr::TtTtvn,
                Attr::TtLastTtvn,
                Attr::TtCrc32,
                Attr::TtFlags,
            ],
            DebugTable::Gateways => vec![
                Attr::OrigAddress,
                Attr::Router,
                Attr::HardIfname,
                Attr::BandwidthDown,
                Attr::BandwidthUp,
            ],
            DebugTable::BlaClaim => {
                vec![Attr::BlaAddress, Attr::BlaVid, Attr::BlaBackbone, Attr::BlaCrc]
            }
            DebugTable::BlaBackbone => {
                vec![Attr::BlaAddress, Attr::BlaVid, Attr::LastSeenMsecs, Attr::BlaCrc]
            }
            DebugTable::DatCache => vec![
                Attr::DatCacheIp4address,
                Attr::DatCacheHwaddress,
                Attr::DatCacheVid,
                Attr::LastSeenMsecs,
            ],
        };

        match (self, algo) {
            (DebugTable::Originators | DebugTable::Gateways, Some(RoutingAlgo::Iv)) => {
                attrs.push(Attr::Tq);
            }
            (
                DebugTable::Neighbors | DebugTable::Originators | DebugTable::Gateways,
                Some(RoutingAlgo::V),
            ) => attrs.push(Attr::Throughput),
            _ => {}
        }

        attrs
    }
}

// ============================================================================
// COMMAND LINE SWITCHES
// ============================================================================

/// Switches of a table command as given on the command line
///
/// Numbers stay strings until validation so a bad value can be reported
/// with the switch it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFlags {
    /// `-n`
    pub no_names: bool,
    /// `-H`
    pub no_header: bool,
    /// `-w [interval]`
    pub watch: Option<String>,
    /// `-t <secs>`
    pub timeout: Option<String>,
    /// `-i <iface>`
    pub orig_iface: Option<String>,
    /// `-u`
    pub unicast_only: bool,
    /// `-m`
    pub multicast_only: bool,
}

fn parse_seconds(flag: char, value: &str, usage: &str) -> Result<f32, crate::Error> {
    value.parse().map_err(|_| {
        crate::Error::usage(
            format!("Error - provided argument of '-{flag}' is not a number"),
            usage,
        )
    })
}

impl DebugTable {
    /// Help text listing the switches this table accepts
    #[must_use]
    pub fn usage(self) -> String {
        let mut usage = format!(
            "Usage: batctl [options] {}|{} [parameters]\n\
             parameters:\n \
             \t -h print this help\n \
             \t -n don't replace mac addresses with bat-host names\n \
             \t -H don't show the header\n \
             \t -w [interval] watch mode - refresh the table continuously\n",
            self.name(),
            self.abbr()
        );
        if self.supports(TableOption::Timeout) {
            usage.push_str(
                " \t -t timeout interval - don't print originators not seen for x.y seconds \n",
            );
        }
        if self.supports(TableOption::OrigIface) {
            usage.push_str(
                " \t -i [interface] - show multiif originator table for a specific interface\n",
            );
        }
        if self.supports(TableOption::UnicastOnly) {
            usage.push_str(" \t -u print unicast mac addresses only\n");
        }
        if self.supports(TableOption::MulticastOnly) {
            usage.push_str(" \t -m print multicast mac addresses only\n");
        }
        usage
    }

    /// Turn validated switches into query options
    ///
    /// Ownership of an `-i` interface is not checked here, it needs sysfs.
    ///
    /// # Errors
    ///
    /// `Usage` for a switch the table does not accept, a non-numeric
    /// interval or timeout, or `-u` together with `-m`.
    pub fn query_options(
        self,
        flags: &TableFlags,
        mesh_iface: &str,
        json: bool,
    ) -> Result<QueryOptions, crate::Error> {
        let usage = self.usage();
        let offered = [
            (flags.timeout.is_some(), TableOption::Timeout, 't'),
            (flags.orig_iface.is_some(), TableOption::OrigIface, 'i'),
            (flags.unicast_only, TableOption::UnicastOnly, 'u'),
            (flags.multicast_only, TableOption::MulticastOnly, 'm'),
        ];
        if let Some((_, _, flag)) = offered
            .iter()
            .find(|(given, option, _)| *given && !self.supports(*option))
        {
            return Err(crate::Error::usage(
                format!("Error - unrecognised option '-{flag}'"),
                usage,
            ));
        }

        if flags.unicast_only && flags.multicast_only {
            return Err(crate::Error::usage(
                "Error - '-u' and '-m' are exclusive options",
                usage,
            ));
        }

        let mut options = QueryOptions::new(mesh_iface);
        options.json = json;
        options.orig_iface = flags.orig_iface.clone();

        if flags.no_names {
            options.read_flags.remove(ReadFlags::USE_BAT_HOSTS);
        }
        if flags.no_header {
            options.read_flags.insert(ReadFlags::SKIP_HEADER);
        }
        if let Some(interval) = &flags.watch {
            options.read_flags.insert(ReadFlags::CLR_CONT_READ);
            options.watch_interval = parse_seconds('w', interval, &usage)?;
        }
        if let Some(timeout) = &flags.timeout {
            options.read_flags.insert(ReadFlags::NO_OLD_ORIGS);
            options.orig_timeout = parse_seconds('t', timeout, &usage)?;
        }
        if flags.unicast_only {
            options.read_flags.insert(ReadFlags::UNICAST_ONLY);
        }
        if flags.multicast_only {
            options.read_flags.insert(ReadFlags::MULTICAST_ONLY);
        }

        Ok(options)
    }
}

/// Routing algorithms with a known table layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingAlgo {
    Iv,
    V,
}

impl RoutingAlgo {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BATMAN_IV" => Some(RoutingAlgo::Iv),
            "BATMAN_V" => Some(RoutingAlgo::V),
            _ => None,
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborEntry {
    pub neighbor: MacAddr,
    pub hard_ifname: String,
    pub last_seen_msecs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginatorEntry {
    pub originator: MacAddr,
    pub neighbor: MacAddr,
    pub hard_ifname: String,
    pub last_seen_msecs: u32,
    pub best: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tq: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransLocalEntry {
    pub client: MacAddr,
    pub vid: i32,
    pub crc32: u32,
    pub flags: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_msecs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransGlobalEntry {
    pub client: MacAddr,
    pub originator: MacAddr,
    pub vid: i32,
    pub ttvn: u8,
    pub last_ttvn: u8,
    pub crc32: u32,
    pub flags: u32,
    pub best: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayEntry {
    pub originator: MacAddr,
    pub router: MacAddr,
    pub hard_ifname: String,
    pub best: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tq: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<u32>,
    pub bandwidth_down: u32,
    pub bandwidth_up: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlaClaimEntry {
    pub client: MacAddr,
    pub vid: i32,
    pub backbone: MacAddr,
    pub own: bool,
    pub crc: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlaBackboneEntry {
    pub originator: MacAddr,
    pub vid: i32,
    pub last_seen_msecs: u32,
    pub crc: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatCacheEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub vid: i32,
    pub last_seen_msecs: u32,
}

/// One decoded table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TableRecord {
    Neighbor(NeighborEntry),
    Originator(OriginatorEntry),
    TransLocal(TransLocalEntry),
    TransGlobal(TransGlobalEntry),
    Gateway(GatewayEntry),
    BlaClaim(BlaClaimEntry),
    BlaBackbone(BlaBackboneEntry),
    DatCache(DatCacheEntry),
}

/// Split milliseconds into the `secs.msecs` pair the tables print
fn secs_msecs(msecs: u32) -> (u32, u32) {
    (msecs / 1000, msecs % 1000)
}

fn flag_char(flags: u32, bit: u32, c: char) -> char {
    if flags & bit != 0 { c } else { '.' }
}

/// Everything a row needs besides its own attributes
pub struct RenderContext<'a> {
    pub options: &'a QueryOptions,
    pub hosts: &'a BatHosts,
    pub algo: Option<RoutingAlgo>,
}

impl RenderContext<'_> {
    fn addr(&self, mac: &MacAddr) -> String {
        self.hosts.display(
            mac,
            self.options.read_flags.contains(ReadFlags::USE_BAT_HOSTS),
        )
    }

    fn accepts_client(&self, client: &MacAddr) -> bool {
        let flags = self.options.read_flags;
        if flags.contains(ReadFlags::UNICAST_ONLY) && client.is_multicast() {
            return false;
        }
        if flags.contains(ReadFlags::MULTICAST_ONLY) && !client.is_multicast() {
            return false;
        }
        true
    }
}

impl TableRecord {
    /// Decode a validated message of `table`
    ///
    /// Returns `None` for rows the read flags filter out or whose hard
    /// interface no longer exists.
    pub fn decode<R: InterfaceResolver + ?Sized>(
        table: DebugTable,
        message: &ParsedMessage,
        ctx: &RenderContext<'_>,
        resolver: &R,
    ) -> Option<TableRecord> {
        let record = match table {
            DebugTable::Neighbors => TableRecord::Neighbor(NeighborEntry {
                neighbor: message.mac(Attr::NeighAddress)?,
                hard_ifname: resolver.name_of(message.u32(Attr::HardIfindex)?)?,
                last_seen_msecs: message.u32(Attr::LastSeenMsecs)?,
                throughput: message.u32(Attr::Throughput),
            }),

            DebugTable::Originators => {
                let last_seen_msecs = message.u32(Attr::LastSeenMsecs)?;
                if ctx.options.is_stale(last_seen_msecs) {
                    return None;
                }
                TableRecord::Originator(OriginatorEntry {
                    originator: message.mac(Attr::OrigAddress)?,
                    neighbor: message.mac(Attr::NeighAddress)?,
                    hard_ifname: resolver.name_of(message.u32(Attr::HardIfindex)?)?,
                    last_seen_msecs,
                    best: message.flag(Attr::FlagBest),
                    tq: message.u8(Attr::Tq),
                    throughput: message.u32(Attr::Throughput),
                })
            }

            DebugTable::TransLocal => {
                let client = message.mac(Attr::TtAddress)?;
                if !ctx.accepts_client(&client) {
                    return None;
                }
                let flags = message.u32(Attr::TtFlags)?;
                let last_seen_msecs = if flags & BATADV_TT_CLIENT_NOPURGE != 0 {
                    None
                } else {
                    message.u32(Attr::LastSeenMsecs)
                };
                TableRecord::TransLocal(TransLocalEntry {
                    client,
                    vid: print_vid(message.u16(Attr::TtVid)?),
                    crc32: message.u32(Attr::TtCrc32)?,
                    flags,
                    last_seen_msecs,
                })
            }

            DebugTable::TransGlobal => {
                let client = message.mac(Attr::TtAddress)?;
                if !ctx.accepts_client(&client) {
                    return None;
                }
                TableRecord::TransGlobal(TransGlobalEntry {
                    client,
                    originator: message.mac(Attr::OrigAddress)?,
                    vid: print_vid(message.u16(Attr::TtVid)?),
                    ttvn: message.u8(Attr::TtTtvn)?,
                    last_ttvn: message.u8(Attr::TtLastTtvn)?,
                    crc32: message.u32(Attr::TtCrc32)?,
                    flags: message.u32(Attr::TtFlags)?,
                    best: message.flag(Attr::FlagBest),
                })
            }

            DebugTable::Gateways => TableRecord::Gateway(GatewayEntry {
                originator: message.mac(Attr::OrigAddress)?,
                router: message.mac(Attr::Router)?,
                hard_ifname: message.string(Attr::HardIfname)?.to_string(),
                best: message.flag(Attr::FlagBest),
                tq: message.u8(Attr::Tq),
                throughput: message.u32(Attr::Throughput),
                bandwidth_down: message.u32(Attr::BandwidthDown)?,
                bandwidth_up: message.u32(Attr::BandwidthUp)?,
            }),

            DebugTable::BlaClaim => TableRecord::BlaClaim(BlaClaimEntry {
                client: message.mac(Attr::BlaAddress)?,
                vid: print_vid(message.u16(Attr::BlaVid)?),
                backbone: message.mac(Attr::BlaBackbone)?,
                own: message.flag(Attr::BlaOwn),
                crc: message.u16(Attr::BlaCrc)?,
            }),

            DebugTable::BlaBackbone => {
                // Our own backbone gateway is not listed
                if message.flag(Attr::BlaOwn) {
                    return None;
                }
                TableRecord::BlaBackbone(BlaBackboneEntry {
                    originator: message.mac(Attr::BlaAddress)?,
                    vid: print_vid(message.u16(Attr::BlaVid)?),
                    last_seen_msecs: message.u32(Attr::LastSeenMsecs)?,
                    crc: message.u16(Attr::BlaCrc)?,
                })
            }

            DebugTable::DatCache => {
                // Stored in network byte order
                let raw = message.u32(Attr::DatCacheIp4address)?;
                TableRecord::DatCache(DatCacheEntry {
                    ip: Ipv4Addr::from(raw.to_ne_bytes()),
                    mac: message.mac(Attr::DatCacheHwaddress)?,
                    vid: print_vid(message.u16(Attr::DatCacheVid)?),
                    last_seen_msecs: message.u32(Attr::LastSeenMsecs)?,
                })
            }
        };

        Some(record)
    }

    /// Text table line, including the trailing newline
    #[must_use]
    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        match self {
            TableRecord::Neighbor(e) => {
                let (secs, msecs) = secs_msecs(e.last_seen_msecs);
                match e.throughput {
                    Some(th) => format!(
                        "{} {:4}.{:03}s ({:9}.{:1}) [{:>10}]\n",
                        ctx.addr(&e.neighbor),
                        secs,
                        msecs,
                        th / 10,
                        th % 10,
                        e.hard_ifname
                    ),
                    None => format!(
                        "{:>10}\t{} {:4}.{:03}s\n",
                        e.hard_ifname,
                        ctx.addr(&e.neighbor),
                        secs,
                        msecs
                    ),
                }
            }

            TableRecord::Originator(e) => {
                let (secs, msecs) = secs_msecs(e.last_seen_msecs);
                let best = if e.best { '*' } else { ' ' };
                match (e.throughput, e.tq) {
                    (Some(th), _) => format!(
                        " {} {} {:4}.{:03}s ({:9}.{:1}) {} [{:>10}]\n",
                        best,
                        ctx.addr(&e.originator),
                        secs,
                        msecs,
                        th / 10,
                        th % 10,
                        ctx.addr(&e.neighbor),
                        e.hard_ifname
                    ),
                    (None, tq) => format!(
                        " {} {} {:4}.{:03}s   ({:3}) {} [{:>10}]\n",
                        best,
                        ctx.addr(&e.originator),
                        secs,
                        msecs,
                        tq.unwrap_or(0),
                        ctx.addr(&e.neighbor),
                        e.hard_ifname
                    ),
                }
            }

            TableRecord::TransLocal(e) => {
                let (secs, msecs) = secs_msecs(e.last_seen_msecs.unwrap_or(0));
                format!(
                    " * {} {:4} [{}{}{}{}{}{}] {:3}.{:03}   (0x{:08x})\n",
                    ctx.addr(&e.client),
                    e.vid,
                    flag_char(e.flags, BATADV_TT_CLIENT_ROAM, 'R'),
                    flag_char(e.flags, BATADV_TT_CLIENT_NOPURGE, 'P'),
                    flag_char(e.flags, BATADV_TT_CLIENT_NEW, 'N'),
                    flag_char(e.flags, BATADV_TT_CLIENT_PENDING, 'X'),
                    flag_char(e.flags, BATADV_TT_CLIENT_WIFI, 'W'),
                    flag_char(e.flags, BATADV_TT_CLIENT_ISOLA, 'I'),
                    secs,
                    msecs,
                    e.crc32
                )
            }

            TableRecord::TransGlobal(e) => format!(
                " {} {} {:4}   ({:3}) via {}     ({:3})   (0x{:08x}) [{}{}{}{}]\n",
                if e.best { '*' } else { ' ' },
                ctx.addr(&e.client),
                e.vid,
                e.ttvn,
                ctx.addr(&e.originator),
                e.last_ttvn,
                e.crc32,
                flag_char(e.flags, BATADV_TT_CLIENT_ROAM, 'R'),
                flag_char(e.flags, BATADV_TT_CLIENT_WIFI, 'W'),
                flag_char(e.flags, BATADV_TT_CLIENT_ISOLA, 'I'),
                flag_char(e.flags, BATADV_TT_CLIENT_TEMP, 'T'),
            ),

            TableRecord::Gateway(e) => {
                let marker = if e.best { "=>" } else { "  " };
                let metric = match (e.throughput, e.tq) {
                    (Some(th), _) => format!("({:9}.{:1})", th / 10, th % 10),
                    (None, tq) => format!("({:3})", tq.unwrap_or(0)),
                };
                format!(
                    "{} {} {} {} [{:>10}]: {}.{}/{}.{} MBit\n",
                    marker,
                    ctx.addr(&e.originator),
                    metric,
                    ctx.addr(&e.router),
                    e.hard_ifname,
                    e.bandwidth_down / 10,
                    e.bandwidth_down % 10,
                    e.bandwidth_up / 10,
                    e.bandwidth_up % 10
                )
            }

            TableRecord::BlaClaim(e) => format!(
                " * {} on {:5} by {} [{}] (0x{:04x})\n",
                ctx.addr(&e.client),
                e.vid,
                ctx.addr(&e.backbone),
                if e.own { 'x' } else { ' ' },
                e.crc
            ),

            TableRecord::BlaBackbone(e) => {
                let (secs, msecs) = secs_msecs(e.last_seen_msecs);
                format!(
                    " * {} on {:5} {:4}.{:03}s (0x{:04x})\n",
                    ctx.addr(&e.originator),
                    e.vid,
                    secs,
                    msecs,
                    e.crc
                )
            }

            TableRecord::DatCache(e) => {
                let secs = e.last_seen_msecs / 1000;
                format!(
                    " * {:>15} {} {:4} {:6}:{:02}\n",
                    e.ip.to_string(),
                    ctx.addr(&e.mac),
                    e.vid,
                    secs / 60,
                    secs % 60
                )
            }
        }
    }
}

// ============================================================================
// DUMP HANDLER
// ============================================================================

/// Receives the rows of one dump round
pub struct TableHandler<'a, R: InterfaceResolver + ?Sized> {
    table: DebugTable,
    mandatory: Vec<Attr>,
    header: PendingHeader,
    ctx: RenderContext<'a>,
    resolver: &'a R,
    out: &'a mut dyn Write,
    collected: Option<Vec<TableRecord>>,
    rows: usize,
}

impl<'a, R: InterfaceResolver + ?Sized> TableHandler<'a, R> {
    pub fn new(
        table: DebugTable,
        header: PendingHeader,
        ctx: RenderContext<'a>,
        resolver: &'a R,
        out: &'a mut dyn Write,
    ) -> Self {
        let collected = ctx.options.json.then(Vec::new);
        Self {
            table,
            mandatory: table.mandatory(ctx.algo),
            header,
            ctx,
            resolver,
            out,
            collected,
            rows: 0,
        }
    }

    /// Rows accepted so far
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl<R: InterfaceResolver + ?Sized> ResponseHandler for TableHandler<'_, R> {
    fn command(&self) -> Command {
        self.table.command()
    }

    fn mandatory(&self) -> &[Attr] {
        &self.mandatory
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        let Some(record) = TableRecord::decode(self.table, message, &self.ctx, self.resolver)
        else {
            return Ok(Control::Continue);
        };

        self.rows += 1;
        match &mut self.collected {
            Some(records) => records.push(record),
            None => {
                self.header.flush(self.out)?;
                self.out.write_all(record.render(&self.ctx).as_bytes())?;
            }
        }
        Ok(Control::Continue)
    }

    fn finish(&mut self) -> Result<(), SessionError> {
        match self.collected.take() {
            Some(records) => {
                let json = serde_json::to_string(&records)
                    .map_err(|e| SessionError::Io(std::io::Error::other(e)))?;
                writeln!(self.out, "{json}")?;
            }
            // An empty table still gets its header
            None => self.header.flush(self.out)?,
        }
        Ok(())
    }
}

// ============================================================================
// QUERY
// ============================================================================

/// Print `table` of `options.mesh_iface`, once or in watch mode
///
/// # Errors
///
/// * `UnknownInterface` when the mesh or hard interface does not exist
/// * `Kernel(EOPNOTSUPP)` when the routing algorithm has no known layout
/// * any error of the mesh info or dump exchange
pub fn print_table<T, R>(
    session: &mut GenlSession<T>,
    table: DebugTable,
    options: &QueryOptions,
    hosts: &BatHosts,
    resolver: &R,
    out: &mut dyn Write,
) -> Result<(), SessionError>
where
    T: Transport,
    R: InterfaceResolver + ?Sized,
{
    let mesh_ifindex = require_index(resolver, &options.mesh_iface)?;
    let hard_ifindex = options
        .orig_iface
        .as_deref()
        .map(|name| require_index(resolver, name))
        .transpose()?;

    let algo = if table.needs_algo() {
        let info = session.fetch_mesh_info(mesh_ifindex, ErrorReporting::Print)?;
        let algo = info.algo_name().and_then(RoutingAlgo::from_name);
        if algo.is_none() {
            tracing::debug!(algo = ?info.algo_name(), "no table layout for routing algorithm");
            return Err(SessionError::Kernel(libc::EOPNOTSUPP));
        }
        algo
    } else {
        None
    };

    let request = GenlRequest::dump(table.command(), mesh_ifindex).with_hard_ifindex(hard_ifindex);
    let show_header = !options.read_flags.contains(ReadFlags::SKIP_HEADER) && !options.json;

    watch(options, out, |out| {
        let header = if show_header {
            match session.fetch_mesh_info(mesh_ifindex, ErrorReporting::Print) {
                Ok(info) => {
                    PendingHeader::new(info.header(table.command(), table.static_header(algo)))
                }
                Err(e @ SessionError::MalformedResponse(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!(error = %e, "mesh info unavailable, printing without header");
                    PendingHeader::none()
                }
            }
        } else {
            PendingHeader::none()
        };

        let ctx = RenderContext {
            options,
            hosts,
            algo,
        };
        let mut handler = TableHandler::new(table, header, ctx, resolver, out);
        session.request(&request, &mut handler, ErrorReporting::Print)?;
        tracing::debug!(table = table.name(), rows = handler.rows(), "table round done");
        Ok(())
    })
}

// ============================================================================
// TESTS
// ============================================================================

//! Query sessions against the batadv family
//!
//! A `GenlSession` owns one socket with the family id already resolved.
//! It sends exactly one request at a time and drives the dispatcher until
//! the exchange is over.
//!
//! # Educational Notes
//!
//! ## The context header
//!
//! Table listings start with a line describing the mesh:
//! ```text
//! [B.A.T.M.A.N. adv 2019.2, MainIF/MAC: eth0/02:00:00:00:00:01 (bat0/02:00:00:00:00:02 BATMAN_IV)]
//! ```
//! It comes from a separate single-shot `GET_MESH_INFO` request issued
//! before every dump round. The rendered text is parked in a
//! `PendingHeader` and written right before the first record, or at the
//! end of the round when the table is empty. It is never printed twice.
//!
//! ## Watch mode
//!
//! ```text
//! loop {
//!     clear screen (optional)
//!     mesh info  → header
//!     dump       → records
//!     stop on error or when not watching
//!     sleep(interval)
//! }
//! ```

use crate::netlink::batadv::{Attr, BATADV_NL_NAME, Command};
use crate::netlink::dispatch::{
    Control, ErrorReporting, ResponseHandler, SessionError, receive,
};
use crate::netlink::genl::{FamilyInfo, resolve_family};
use crate::netlink::message::GenlRequest;
use crate::netlink::policy::ParsedMessage;
use crate::netlink::socket::{NetlinkProtocol, NetlinkSocket, Transport};
use crate::{MacAddr, QueryOptions};
use std::ffi::{CStr, CString};
use std::io::{self, Write};

/// Escape sequence clearing the terminal and homing the cursor
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[0;0f";

// ============================================================================
// INTERFACE NAMES
// ============================================================================

/// Maps interface names to kernel indices and back
pub trait InterfaceResolver {
    fn index_of(&self, name: &str) -> Option<u32>;
    fn name_of(&self, index: u32) -> Option<String>;
}

/// Resolver backed by `if_nametoindex(3)` / `if_indextoname(3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceResolver for SystemInterfaces {
    fn index_of(&self, name: &str) -> Option<u32> {
        let name = CString::new(name).ok()?;
        // SAFETY: name is a valid NUL-terminated string.
        let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        (index != 0).then_some(index)
    }

    fn name_of(&self, index: u32) -> Option<String> {
        let mut buffer = [0 as libc::c_char; libc::IF_NAMESIZE];
        // SAFETY: buffer holds IF_NAMESIZE bytes as required.
        let ret = unsafe { libc::if_indextoname(index, buffer.as_mut_ptr()) };
        if ret.is_null() {
            return None;
        }
        // SAFETY: on success the kernel wrote a NUL-terminated name.
        let name = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }
}

/// Resolve `name`, failing with `UnknownInterface`
///
/// # Errors
///
/// `UnknownInterface` when no such link exists.
pub fn require_index<R: InterfaceResolver + ?Sized>(
    resolver: &R,
    name: &str,
) -> Result<u32, SessionError> {
    resolver
        .index_of(name)
        .ok_or_else(|| SessionError::UnknownInterface(name.to_string()))
}

// ============================================================================
// SESSION
// ============================================================================

/// One socket talking to the resolved `batadv` family
pub struct GenlSession<T: Transport> {
    transport: T,
    family: FamilyInfo,
    seq: u32,
}

impl GenlSession<NetlinkSocket> {
    /// Open a generic netlink socket and resolve the `batadv` family
    ///
    /// # Errors
    ///
    /// `ProtocolUnsupported` when the module is not loaded (or too old),
    /// `Socket` when the socket cannot be opened.
    pub fn open() -> Result<Self, SessionError> {
        let socket = NetlinkSocket::new(NetlinkProtocol::Generic)?;
        Self::with_transport(socket)
    }
}

impl<T: Transport> GenlSession<T> {
    /// Resolve the `batadv` family over an existing transport
    ///
    /// # Errors
    ///
    /// See `resolve_family`.
    pub fn with_transport(transport: T) -> Result<Self, SessionError> {
        let family = resolve_family(&transport, BATADV_NL_NAME)?;
        Ok(Self {
            transport,
            family,
            seq: 0,
        })
    }

    #[must_use]
    pub fn family(&self) -> &FamilyInfo {
        &self.family
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request` without waiting for any reply
    ///
    /// # Errors
    ///
    /// `Socket` when the send fails.
    pub fn send(&mut self, request: &GenlRequest) -> Result<(), SessionError> {
        self.seq = self.seq.wrapping_add(1);
        let data = request.build(self.family.id, self.seq);
        tracing::debug!(
            command = request.command.code(),
            flags = request.flags(),
            seq = self.seq,
            "sending batadv request"
        );
        self.transport.send(&data)?;
        Ok(())
    }

    /// Send `request` and dispatch every reply to `handler`
    ///
    /// # Errors
    ///
    /// Whatever the send or the receive loop reports.
    pub fn request<H: ResponseHandler + ?Sized>(
        &mut self,
        request: &GenlRequest,
        handler: &mut H,
        reporting: ErrorReporting,
    ) -> Result<(), SessionError> {
        self.send(request)?;
        receive(&self.transport, handler, reporting)
    }

    /// Fetch the mesh info of `mesh_ifindex`
    ///
    /// # Errors
    ///
    /// `MissingAttributes` when the reply lacks a required attribute or
    /// never arrives, plus the usual session errors.
    pub fn fetch_mesh_info(
        &mut self,
        mesh_ifindex: u32,
        reporting: ErrorReporting,
    ) -> Result<MeshInfo, SessionError> {
        let mut handler = MeshInfoHandler::default();
        let request = GenlRequest::new(Command::GetMeshInfo, mesh_ifindex);
        self.request(&request, &mut handler, reporting)?;
        handler
            .info
            .ok_or(SessionError::MissingAttributes(Attr::MeshIfname))
    }

    /// Print the routing algorithms the module offers
    ///
    /// # Errors
    ///
    /// Session errors; the header is only written when the dump succeeded.
    pub fn print_routing_algos(&mut self, out: &mut dyn Write) -> Result<(), SessionError> {
        let mut handler = RoutingAlgosHandler {
            header: PendingHeader::new("Available routing algorithms:\n"),
            out,
        };
        let request = GenlRequest::dump(Command::GetRoutingAlgos, 0);
        self.request(&request, &mut handler, ErrorReporting::Print)
    }

    /// Originator currently announcing the client `mac`
    ///
    /// Only entries carrying `FLAG_BEST` count; the first match wins.
    ///
    /// # Errors
    ///
    /// `NotFound` when no best entry matches, plus session errors.
    pub fn translate_mac(
        &mut self,
        mesh_ifindex: u32,
        mac: MacAddr,
    ) -> Result<MacAddr, SessionError> {
        let mut handler = TranslateHandler { mac, found: None };
        let request = GenlRequest::dump(Command::GetTranstableGlobal, mesh_ifindex);
        self.request(&request, &mut handler, ErrorReporting::Silent)?;
        tracing::debug!(client = %mac, found = ?handler.found, "translation table lookup");
        handler.found.ok_or(SessionError::NotFound)
    }

    /// Best next hop towards the originator `orig`
    ///
    /// # Errors
    ///
    /// `NotFound` when no best route exists, plus session errors.
    pub fn get_nexthop<R: InterfaceResolver + ?Sized>(
        &mut self,
        mesh_ifindex: u32,
        orig: MacAddr,
        resolver: &R,
    ) -> Result<NextHop, SessionError> {
        let mut handler = NextHopHandler {
            orig,
            resolver,
            found: None,
        };
        let request = GenlRequest::dump(Command::GetOriginators, mesh_ifindex);
        self.request(&request, &mut handler, ErrorReporting::Silent)?;
        handler.found.ok_or(SessionError::NotFound)
    }

    /// Hardware address of the primary interface
    ///
    /// # Errors
    ///
    /// `NotFound` when the mesh has no primary interface.
    pub fn get_primarymac(&mut self, mesh_ifindex: u32) -> Result<MacAddr, SessionError> {
        let mut handler = PrimaryMacHandler { found: None };
        let request = GenlRequest::new(Command::GetMeshInfo, mesh_ifindex);
        self.request(&request, &mut handler, ErrorReporting::Silent)?;
        handler.found.ok_or(SessionError::NotFound)
    }
}

/// Repeat `round` while the options ask for watch mode
///
/// The screen is cleared before each round when `CLR_CONT_READ` is set.
/// The loop ends at the first failed round.
///
/// # Errors
///
/// The error of the failed round.
pub fn watch<F, E>(options: &QueryOptions, out: &mut dyn Write, mut round: F) -> Result<(), E>
where
    F: FnMut(&mut dyn Write) -> Result<(), E>,
    E: From<io::Error>,
{
    let mut rounds = 0u64;
    loop {
        if options.read_flags.contains(crate::ReadFlags::CLR_CONT_READ) {
            out.write_all(CLEAR_SCREEN.as_bytes())?;
        }

        round(out)?;
        out.flush()?;
        rounds += 1;

        if !options.read_flags.is_continuous() {
            return Ok(());
        }

        tracing::trace!(rounds, interval = options.watch_interval, "watch round done");
        std::thread::sleep(options.watch_duration());
    }
}

// ============================================================================
// HEADER
// ============================================================================

/// Header text waiting for the first record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingHeader(Option<String>);

impl PendingHeader {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        PendingHeader(Some(text.into()))
    }

    #[must_use]
    pub fn none() -> Self {
        PendingHeader(None)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }

    /// Write the header if it has not been written yet
    ///
    /// # Errors
    ///
    /// I/O errors of `out`.
    pub fn flush(&mut self, out: &mut dyn Write) -> io::Result<()> {
        match self.0.take() {
            Some(text) => out.write_all(text.as_bytes()),
            None => Ok(()),
        }
    }
}

/// Primary interface details; present once a hard interface is enslaved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryInfo {
    pub version: String,
    pub algo_name: String,
    pub hard_ifname: String,
    pub hard_address: MacAddr,
}

/// Reply of `GET_MESH_INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshInfo {
    pub mesh_ifindex: u32,
    pub mesh_ifname: String,
    pub mesh_address: MacAddr,
    pub primary: Option<PrimaryInfo>,
    pub tt_ttvn: Option<u8>,
    pub bla_crc: Option<u16>,
    pub mcast_flags: Option<u32>,
    pub mcast_flags_priv: Option<u32>,
}

const INFO_MANDATORY: [Attr; 3] = [Attr::MeshIfindex, Attr::MeshIfname, Attr::MeshAddress];

const INFO_HARD_MANDATORY: [Attr; 4] = [
    Attr::Version,
    Attr::AlgoName,
    Attr::HardIfname,
    Attr::HardAddress,
];

impl MeshInfo {
    /// Decode a validated mesh info message
    ///
    /// # Errors
    ///
    /// `MissingAttributes` for absent mandatory attributes.
    pub fn from_message(message: &ParsedMessage) -> Result<Self, SessionError> {
        message.validate_mandatory(&INFO_MANDATORY)?;

        let primary = if message.contains(Attr::HardIfname) {
            message.validate_mandatory(&INFO_HARD_MANDATORY)?;
            Some(PrimaryInfo {
                version: message.string(Attr::Version).unwrap_or_default().to_string(),
                algo_name: message.string(Attr::AlgoName).unwrap_or_default().to_string(),
                hard_ifname: message.string(Attr::HardIfname).unwrap_or_default().to_string(),
                hard_address: message.mac(Attr::HardAddress).unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(Self {
            mesh_ifindex: message.u32(Attr::MeshIfindex).unwrap_or_default(),
            mesh_ifname: message.string(Attr::MeshIfname).unwrap_or_default().to_string(),
            mesh_address: message.mac(Attr::MeshAddress).unwrap_or_default(),
            primary,
            tt_ttvn: message.u8(Attr::TtTtvn),
            bla_crc: message.u16(Attr::BlaCrc),
            mcast_flags: message.u32(Attr::McastFlags),
            mcast_flags_priv: message.u32(Attr::McastFlagsPriv),
        })
    }

    /// Routing algorithm; `None` while the mesh is disabled
    #[must_use]
    pub fn algo_name(&self) -> Option<&str> {
        self.primary.as_ref().map(|p| p.algo_name.as_str())
    }

    /// Context header for a listing of `command`
    #[must_use]
    pub fn header(&self, command: Command, static_header: &str) -> String {
        let Some(primary) = &self.primary else {
            return format!("BATMAN mesh {} disabled\n", self.mesh_ifname);
        };

        let extra = match command {
            Command::GetTranstableLocal => format!(", TTVN: {}", self.tt_ttvn.unwrap_or(0)),
            Command::GetBlaBackbone | Command::GetBlaClaim => {
                format!(", group id: 0x{:04x}", self.bla_crc.unwrap_or(0))
            }
            _ => String::new(),
        };

        format!(
            "[B.A.T.M.A.N. adv {}, MainIF/MAC: {}/{} ({}/{} {}){}]\n{}",
            primary.version,
            primary.hard_ifname,
            primary.hard_address,
            self.mesh_ifname,
            self.mesh_address,
            primary.algo_name,
            extra,
            static_header
        )
    }
}

/// Result of a next-hop lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    pub neighbor: MacAddr,
    pub hard_ifindex: u32,
    pub hard_ifname: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Default)]
struct MeshInfoHandler {
    info: Option<MeshInfo>,
}

impl ResponseHandler for MeshInfoHandler {
    fn command(&self) -> Command {
        Command::GetMeshInfo
    }

    // Checked in `MeshInfo::from_message`: a missing attribute is fatal here
    fn mandatory(&self) -> &[Attr] {
        &[]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        self.info = Some(MeshInfo::from_message(message)?);
        Ok(Control::Stop)
    }
}

struct RoutingAlgosHandler<'w> {
    header: PendingHeader,
    out: &'w mut dyn Write,
}

impl ResponseHandler for RoutingAlgosHandler<'_> {
    fn command(&self) -> Command {
        Command::GetRoutingAlgos
    }

    fn mandatory(&self) -> &[Attr] {
        &[Attr::AlgoName]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        self.header.flush(self.out)?;
        writeln!(self.out, " * {}", message.string(Attr::AlgoName).unwrap_or_default())?;
        Ok(Control::Continue)
    }

    fn finish(&mut self) -> Result<(), SessionError> {
        self.header.flush(self.out)?;
        Ok(())
    }
}

struct TranslateHandler {
    mac: MacAddr,
    found: Option<MacAddr>,
}

impl ResponseHandler for TranslateHandler {
    fn command(&self) -> Command {
        Command::GetTranstableGlobal
    }

    fn mandatory(&self) -> &[Attr] {
        &[Attr::TtAddress, Attr::OrigAddress]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        if !message.flag(Attr::FlagBest) || message.mac(Attr::TtAddress) != Some(self.mac) {
            return Ok(Control::Continue);
        }
        self.found = message.mac(Attr::OrigAddress);
        Ok(Control::Stop)
    }
}

struct NextHopHandler<'r, R: InterfaceResolver + ?Sized> {
    orig: MacAddr,
    resolver: &'r R,
    found: Option<NextHop>,
}

impl<R: InterfaceResolver + ?Sized> ResponseHandler for NextHopHandler<'_, R> {
    fn command(&self) -> Command {
        Command::GetOriginators
    }

    fn mandatory(&self) -> &[Attr] {
        &[Attr::OrigAddress, Attr::NeighAddress, Attr::HardIfindex]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        if !message.flag(Attr::FlagBest) || message.mac(Attr::OrigAddress) != Some(self.orig) {
            return Ok(Control::Continue);
        }

        let (Some(neighbor), Some(hard_ifindex)) =
            (message.mac(Attr::NeighAddress), message.u32(Attr::HardIfindex))
        else {
            return Ok(Control::Continue);
        };

        // A route over an interface that vanished meanwhile is no route
        let Some(hard_ifname) = self.resolver.name_of(hard_ifindex) else {
            return Ok(Control::Continue);
        };

        self.found = Some(NextHop {
            neighbor,
            hard_ifindex,
            hard_ifname,
        });
        Ok(Control::Stop)
    }
}

struct PrimaryMacHandler {
    found: Option<MacAddr>,
}

impl ResponseHandler for PrimaryMacHandler {
    fn command(&self) -> Command {
        Command::GetMeshInfo
    }

    fn mandatory(&self) -> &[Attr] {
        &[Attr::HardAddress]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        self.found = message.mac(Attr::HardAddress);
        Ok(Control::Stop)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::policy::AttrValue;
    use crate::ReadFlags;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    fn enabled_info() -> ParsedMessage {
        ParsedMessage::with_values(
            Command::GetMeshInfo.code(),
            [
                (Attr::MeshIfindex, AttrValue::U32(4)),
                (Attr::MeshIfname, AttrValue::String("bat0".into())),
                (Attr::MeshAddress, AttrValue::Bytes(mac(2).0.to_vec())),
                (Attr::Version, AttrValue::String("2019.2".into())),
                (Attr::AlgoName, AttrValue::String("BATMAN_IV".into())),
                (Attr::HardIfname, AttrValue::String("eth0".into())),
                (Attr::HardAddress, AttrValue::Bytes(mac(1).0.to_vec())),
                (Attr::TtTtvn, AttrValue::U8(7)),
                (Attr::BlaCrc, AttrValue::U16(0xbeef)),
            ],
        )
    }

    #[test]
    fn test_header_for_enabled_mesh() {
        let info = MeshInfo::from_message(&enabled_info()).expect("complete info");
        assert_eq!(info.algo_name(), Some("BATMAN_IV"));
        assert_eq!(
            info.header(Command::GetOriginators, "columns\n"),
            "[B.A.T.M.A.N. adv 2019.2, MainIF/MAC: eth0/02:00:00:00:00:01 \
             (bat0/02:00:00:00:00:02 BATMAN_IV)]\ncolumns\n"
        );
    }

    #[test]
    fn test_header_extras() {
        let info = MeshInfo::from_message(&enabled_info()).unwrap();
        assert!(info
            .header(Command::GetTranstableLocal, "")
            .contains("BATMAN_IV), TTVN: 7]"));
        assert!(info
            .header(Command::GetBlaClaim, "")
            .contains("BATMAN_IV), group id: 0xbeef]"));
    }

    #[test]
    fn test_header_for_disabled_mesh() {
        let message = ParsedMessage::with_values(
            Command::GetMeshInfo.code(),
            [
                (Attr::MeshIfindex, AttrValue::U32(4)),
                (Attr::MeshIfname, AttrValue::String("bat0".into())),
                (Attr::MeshAddress, AttrValue::Bytes(mac(2).0.to_vec())),
            ],
        );
        let info = MeshInfo::from_message(&message).unwrap();
        assert_eq!(info.algo_name(), None);
        assert_eq!(info.header(Command::GetNeighbors, "x"), "BATMAN mesh bat0 disabled\n");
    }

    #[test]
    fn test_hard_interface_requires_version_and_algo() {
        let message = ParsedMessage::with_values(
            Command::GetMeshInfo.code(),
            [
                (Attr::MeshIfindex, AttrValue::U32(4)),
                (Attr::MeshIfname, AttrValue::String("bat0".into())),
                (Attr::MeshAddress, AttrValue::Bytes(mac(2).0.to_vec())),
                (Attr::HardIfname, AttrValue::String("eth0".into())),
            ],
        );
        let err = MeshInfo::from_message(&message).unwrap_err();
        assert!(matches!(err, SessionError::MissingAttributes(Attr::Version)));
    }

    #[test]
    fn test_pending_header_flushes_once() {
        let mut header = PendingHeader::new("hdr\n");
        let mut out = Vec::new();
        header.flush(&mut out).unwrap();
        header.flush(&mut out).unwrap();
        assert_eq!(out, b"hdr\n");
        assert!(!header.is_pending());
    }

    #[test]
    fn test_watch_single_round_without_flags() {
        let options = QueryOptions::new("bat0");
        let mut out = Vec::new();
        let mut calls = 0;
        watch(&options, &mut out, |_| {
            calls += 1;
            Ok::<(), SessionError>(())
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_watch_repeats_until_error_and_clears_screen() {
        let mut options = QueryOptions::new("bat0");
        options.read_flags.insert(ReadFlags::CLR_CONT_READ);
        options.watch_interval = 0.0;

        let mut out = Vec::new();
        let mut calls = 0;
        let err = watch(&options, &mut out, |out| {
            calls += 1;
            write!(out, "round{calls}")?;
            if calls == 3 {
                return Err(SessionError::Kernel(libc::ENODEV));
            }
            Ok(())
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.errno(), libc::ENODEV);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches(CLEAR_SCREEN).count(), 3);
        assert!(text.ends_with("round3"));
    }

    #[test]
    fn test_translate_handler_requires_best_flag() {
        let mut handler = TranslateHandler {
            mac: mac(9),
            found: None,
        };
        let not_best = ParsedMessage::with_values(
            Command::GetTranstableGlobal.code(),
            [
                (Attr::TtAddress, AttrValue::Bytes(mac(9).0.to_vec())),
                (Attr::OrigAddress, AttrValue::Bytes(mac(1).0.to_vec())),
            ],
        );
        assert_eq!(handler.handle(&not_best).unwrap(), Control::Continue);
        assert_eq!(handler.found, None);
    }

    struct OnlyEth0;

    impl InterfaceResolver for OnlyEth0 {
        fn index_of(&self, name: &str) -> Option<u32> {
            (name == "eth0").then_some(3)
        }

        fn name_of(&self, index: u32) -> Option<String> {
            (index == 3).then(|| "eth0".to_string())
        }
    }

    fn originator(orig: MacAddr, neigh: MacAddr, hard_ifindex: u32, best: bool) -> ParsedMessage {
        let mut values = vec![
            (Attr::OrigAddress, AttrValue::Bytes(orig.0.to_vec())),
            (Attr::NeighAddress, AttrValue::Bytes(neigh.0.to_vec())),
            (Attr::HardIfindex, AttrValue::U32(hard_ifindex)),
        ];
        if best {
            values.push((Attr::FlagBest, AttrValue::Flag));
        }
        ParsedMessage::with_values(Command::GetOriginators.code(), values)
    }

    #[test]
    fn test_nexthop_takes_first_best_route() {
        let mut handler = NextHopHandler {
            orig: mac(9),
            resolver: &OnlyEth0,
            found: None,
        };

        // other originator, then a non-best route, then a vanished interface
        let skipped = [
            originator(mac(8), mac(5), 3, true),
            originator(mac(9), mac(5), 3, false),
            originator(mac(9), mac(5), 7, true),
        ];
        for message in &skipped {
            assert_eq!(handler.handle(message).unwrap(), Control::Continue);
        }
        assert_eq!(handler.found, None);

        let best = originator(mac(9), mac(6), 3, true);
        assert_eq!(handler.handle(&best).unwrap(), Control::Stop);
        assert_eq!(
            handler.found,
            Some(NextHop {
                neighbor: mac(6),
                hard_ifindex: 3,
                hard_ifname: "eth0".to_string(),
            })
        );
    }

    #[test]
    fn test_primary_mac_from_mesh_info() {
        let mut handler = PrimaryMacHandler { found: None };
        assert_eq!(handler.mandatory(), &[Attr::HardAddress]);
        assert_eq!(handler.handle(&enabled_info()).unwrap(), Control::Stop);
        assert_eq!(handler.found, Some(mac(1)));
    }
}

// Scenario tests for the batctl library
// Each group drives several modules together: scripted kernel replies
// through session and table rendering, scratch sysfs trees through the
// settings helpers, and library errors through the crate error taxonomy.

use crate::*;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

static SCRATCH_ID: AtomicUsize = AtomicUsize::new(0);

/// Scratch root below the temp dir, removed on drop
struct Scratch {
    root: PathBuf,
}

impl Scratch {
    fn new(tag: &str) -> Self {
        let id = SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "batctl-scenario-{tag}-{}-{id}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn layout(&self) -> sysfs::SysfsLayout {
        sysfs::SysfsLayout::with_root(&self.root)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, last])
}

fn hosts_with(entries: &[(MacAddr, &str)]) -> bat_hosts::BatHosts {
    let mut hosts = bat_hosts::BatHosts::empty();
    for (mac, name) in entries {
        hosts.insert(*mac, name);
    }
    hosts
}

// ============================================================================
// Scripted kernel
// ============================================================================
#[cfg(target_os = "linux")]
mod kernel {
    use super::*;
    use crate::netlink::batadv::{Attr, Command};
    use crate::netlink::message::MessageBuilder;
    use crate::netlink::session::InterfaceResolver;
    use crate::netlink::socket::{SocketError, Transport};
    use crate::netlink::structures::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    pub const FAMILY: u16 = 0x1c;

    /// Replays canned datagrams and records what was sent
    pub struct Scripted {
        pub sent: RefCell<Vec<Vec<u8>>>,
        replies: RefCell<VecDeque<Vec<u8>>>,
    }

    impl Scripted {
        /// Controller reply first, then `replies` in order
        pub fn with_family(replies: Vec<Vec<u8>>) -> Self {
            let mut all = vec![family_reply()];
            all.extend(replies);
            Self {
                sent: RefCell::default(),
                replies: RefCell::new(all.into()),
            }
        }
    }

    impl Transport for Scripted {
        fn send(&self, data: &[u8]) -> Result<(), SocketError> {
            self.sent.borrow_mut().push(data.to_vec());
            Ok(())
        }

        fn recv(&self, buffer: &mut [u8]) -> Result<usize, SocketError> {
            let Some(reply) = self.replies.borrow_mut().pop_front() else {
                return Ok(0);
            };
            buffer[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        }
    }

    /// bat0 is ifindex 4, nothing else exists
    pub struct MeshOnly;

    impl InterfaceResolver for MeshOnly {
        fn index_of(&self, name: &str) -> Option<u32> {
            (name == "bat0").then_some(4)
        }

        fn name_of(&self, _index: u32) -> Option<String> {
            None
        }
    }

    fn family_reply() -> Vec<u8> {
        let mut builder = MessageBuilder::new(GENL_ID_CTRL, 0, 0);
        builder.put_genl_header(1, 2);
        builder.put_u16(CTRL_ATTR_FAMILY_ID, FAMILY);
        builder.finish()
    }

    pub fn mesh_info() -> Vec<u8> {
        let mut builder = MessageBuilder::new(FAMILY, 0, 1);
        builder.put_genl_header(Command::GetMeshInfo.code(), 1);
        builder.put_u32(Attr::MeshIfindex.id(), 4);
        builder.put_string(Attr::MeshIfname.id(), "bat0");
        builder.put_attr(Attr::MeshAddress.id(), mac(2).as_bytes());
        builder.put_string(Attr::Version.id(), "2019.2");
        builder.put_string(Attr::AlgoName.id(), "BATMAN_IV");
        builder.put_string(Attr::HardIfname.id(), "eth0");
        builder.put_attr(Attr::HardAddress.id(), mac(1).as_bytes());
        builder.finish()
    }

    pub fn dat_entry(ip: [u8; 4], hw: MacAddr, vid: u16, last_seen_msecs: u32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(FAMILY, NLM_F_MULTI, 2);
        builder.put_genl_header(Command::GetDatCache.code(), 1);
        builder.put_u32(Attr::DatCacheIp4address.id(), u32::from_ne_bytes(ip));
        builder.put_attr(Attr::DatCacheHwaddress.id(), hw.as_bytes());
        builder.put_u16(Attr::DatCacheVid.id(), vid);
        builder.put_u32(Attr::LastSeenMsecs.id(), last_seen_msecs);
        builder.finish()
    }

    pub fn global_entry(client: MacAddr, orig: MacAddr, best: bool) -> Vec<u8> {
        let mut builder = MessageBuilder::new(FAMILY, NLM_F_MULTI, 2);
        builder.put_genl_header(Command::GetTranstableGlobal.code(), 1);
        builder.put_attr(Attr::TtAddress.id(), client.as_bytes());
        builder.put_attr(Attr::OrigAddress.id(), orig.as_bytes());
        if best {
            builder.put_attr(Attr::FlagBest.id(), &[]);
        }
        builder.finish()
    }

    pub fn done(errno: i32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NLMSG_DONE, NLM_F_MULTI, 2);
        builder.put_struct(&(-errno));
        builder.finish()
    }

    pub fn error(errno: i32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NLMSG_ERROR, 0, 1);
        builder.put_struct(&(-errno));
        builder.finish()
    }

    /// Commands of every batadv request that went out
    pub fn sent_commands(transport: &Scripted) -> Vec<u8> {
        transport
            .sent
            .borrow()
            .iter()
            .filter(|m| read_struct::<NlMsgHdr>(m).is_some_and(|h| h.nlmsg_type == FAMILY))
            .filter_map(|m| m.get(NLMSG_HDRLEN).copied())
            .collect()
    }
}

// ============================================================================
// Tests for netlink table printing
// ============================================================================
#[cfg(target_os = "linux")]
mod test_table_printing {
    use super::kernel::*;
    use super::*;
    use crate::netlink::batadv::Command;
    use crate::netlink::session::GenlSession;
    use crate::netlink::tables::{DebugTable, print_table};

    const DAT_HEADER: &str = "[B.A.T.M.A.N. adv 2019.2, MainIF/MAC: eth0/02:00:00:00:00:01 \
                              (bat0/02:00:00:00:00:02 BATMAN_IV)]\n          \
                              IPv4             MAC        VID   last-seen\n";

    fn dat_dump() -> Vec<u8> {
        let mut datagram = dat_entry([192, 168, 0, 5], mac(0x0a), 0, 65_000);
        datagram.extend(dat_entry([10, 0, 0, 1], mac(0x0b), 0x8000 | 5, 1_000));
        datagram.extend(done(0));
        datagram
    }

    #[test]
    fn test_dat_cache_with_header_and_names() {
        let mut session = GenlSession::with_transport(Scripted::with_family(vec![
            mesh_info(),
            dat_dump(),
        ]))
        .unwrap();
        let hosts = hosts_with(&[(mac(0x0a), "laptop")]);
        let options = QueryOptions::new("bat0");

        let mut out = Vec::<u8>::new();
        print_table(&mut session, DebugTable::DatCache, &options, &hosts, &MeshOnly, &mut out)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let expected = format!(
            "{DAT_HEADER} *     192.168.0.5            laptop   -1      1:05\n \
             *        10.0.0.1 02:00:00:00:00:0b    5      0:01\n"
        );
        assert_eq!(text, expected);
        assert_eq!(
            sent_commands(session.transport()),
            vec![Command::GetMeshInfo.code(), Command::GetDatCache.code()]
        );
    }

    #[test]
    fn test_empty_dump_prints_header_once() {
        let mut session = GenlSession::with_transport(Scripted::with_family(vec![
            mesh_info(),
            done(0),
        ]))
        .unwrap();
        let options = QueryOptions::new("bat0");

        let mut out = Vec::<u8>::new();
        print_table(
            &mut session,
            DebugTable::DatCache,
            &options,
            &hosts_with(&[]),
            &MeshOnly,
            &mut out,
        )
        .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), DAT_HEADER);
    }

    #[test]
    fn test_watch_repeats_rounds_until_kernel_error() {
        let mut session = GenlSession::with_transport(Scripted::with_family(vec![
            mesh_info(),
            done(0),
            mesh_info(),
            done(0),
            mesh_info(),
            error(libc::ENODEV),
        ]))
        .unwrap();
        let mut options = QueryOptions::new("bat0");
        options.read_flags.insert(ReadFlags::CONT_READ);
        options.watch_interval = 0.0;

        let mut out = Vec::<u8>::new();
        let err = print_table(
            &mut session,
            DebugTable::DatCache,
            &options,
            &hosts_with(&[]),
            &MeshOnly,
            &mut out,
        )
        .unwrap_err();

        assert_eq!(err.errno(), libc::ENODEV);
        // the failed round never flushes its header
        assert_eq!(String::from_utf8(out).unwrap(), DAT_HEADER.repeat(2));
        let info = Command::GetMeshInfo.code();
        let dump = Command::GetDatCache.code();
        assert_eq!(
            sent_commands(session.transport()),
            vec![info, dump, info, dump, info, dump]
        );
    }

    #[test]
    fn test_no_header_skips_mesh_info() {
        let mut session =
            GenlSession::with_transport(Scripted::with_family(vec![dat_dump()])).unwrap();
        let mut options = QueryOptions::new("bat0");
        options.read_flags = ReadFlags::SKIP_HEADER;

        let mut out = Vec::<u8>::new();
        print_table(
            &mut session,
            DebugTable::DatCache,
            &options,
            &hosts_with(&[(mac(0x0a), "laptop")]),
            &MeshOnly,
            &mut out,
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(" *     192.168.0.5 02:00:00:00:00:0a"));
        assert_eq!(
            sent_commands(session.transport()),
            vec![Command::GetDatCache.code()]
        );
    }

    #[test]
    fn test_json_prints_one_array() {
        let mut session =
            GenlSession::with_transport(Scripted::with_family(vec![dat_dump()])).unwrap();
        let mut options = QueryOptions::new("bat0");
        options.json = true;

        let mut out = Vec::<u8>::new();
        print_table(
            &mut session,
            DebugTable::DatCache,
            &options,
            &bat_hosts::BatHosts::empty(),
            &MeshOnly,
            &mut out,
        )
        .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[{\"ip\":\"192.168.0.5\",\"mac\":\"02:00:00:00:00:0a\",\"vid\":-1,\"last_seen_msecs\":65000},\
             {\"ip\":\"10.0.0.1\",\"mac\":\"02:00:00:00:00:0b\",\"vid\":5,\"last_seen_msecs\":1000}]\n"
        );
    }

    #[test]
    fn test_unsupported_dump_allows_fallback() {
        let mut session = GenlSession::with_transport(Scripted::with_family(vec![
            mesh_info(),
            error(libc::EOPNOTSUPP),
        ]))
        .unwrap();

        let mut out = Vec::<u8>::new();
        let err = print_table(
            &mut session,
            DebugTable::DatCache,
            &QueryOptions::new("bat0"),
            &bat_hosts::BatHosts::empty(),
            &MeshOnly,
            &mut out,
        )
        .unwrap_err();

        let err = Error::from(err);
        assert!(err.is_not_supported());
        assert!(out.is_empty());
    }

    #[test]
    fn test_unknown_mesh_interface() {
        let mut session = GenlSession::with_transport(Scripted::with_family(vec![])).unwrap();
        let mut options = QueryOptions::new("bat7");
        options.read_flags = ReadFlags::SKIP_HEADER;

        let err = print_table(
            &mut session,
            DebugTable::DatCache,
            &options,
            &bat_hosts::BatHosts::empty(),
            &MeshOnly,
            &mut Vec::<u8>::new(),
        )
        .unwrap_err();

        assert_eq!(Error::from(err).to_string(), "Error - interface bat7 is unknown");
        assert!(sent_commands(session.transport()).is_empty());
    }
}

// ============================================================================
// Tests for translate lookups
// ============================================================================
#[cfg(target_os = "linux")]
mod test_translate {
    use super::kernel::*;
    use super::*;
    use crate::netlink::session::GenlSession;

    #[test]
    fn test_bat_host_name_translates_to_best_originator() {
        let hosts = hosts_with(&[(mac(0x0c), "phone")]);
        let client = hosts.resolve("phone").unwrap();

        let mut datagram = global_entry(mac(0x0c), mac(5), false);
        datagram.extend(global_entry(mac(0x0c), mac(6), true));
        datagram.extend(done(0));
        let mut session =
            GenlSession::with_transport(Scripted::with_family(vec![datagram])).unwrap();

        assert_eq!(session.translate_mac(4, client).unwrap(), mac(6));
    }

    #[test]
    fn test_missing_client_is_not_found() {
        let mut datagram = global_entry(mac(0x0d), mac(5), true);
        datagram.extend(done(0));
        let mut session =
            GenlSession::with_transport(Scripted::with_family(vec![datagram])).unwrap();

        let err = Error::from(session.translate_mac(4, mac(0x0c)).unwrap_err());
        assert!(matches!(err, Error::NotFound));
        assert!(!err.is_reported());
    }
}

// ============================================================================
// Tests for the debugfs fallback
// ============================================================================
#[cfg(all(target_os = "linux", feature = "legacy_debugfs"))]
mod test_debugfs_fallback {
    use super::*;
    use crate::netlink::tables::{DebugTable, TableFlags};

    const ORIGINATORS: &str = "\
[B.A.T.M.A.N. adv 2016.5, MainIF/MAC: eth0/02:00:00:00:00:01 (bat0 BATMAN_IV)]
   Originator      last-seen (#/255)           Nexthop [outgoingIF]:   Potential nexthops ...
02:00:00:00:00:02    0.420s   (255) 02:00:00:00:00:02 [      eth0]: 02:00:00:00:00:02 (255)
02:00:00:00:00:03    5.100s   (120) 02:00:00:00:00:02 [      eth0]: 02:00:00:00:00:02 (120)
";

    #[test]
    fn test_switches_filter_table_file() {
        let scratch = Scratch::new("debugfs");
        let layout = scratch.layout();
        let dir = layout.debugfs_dir("bat0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("originators"), ORIGINATORS).unwrap();

        let flags = TableFlags {
            no_header: true,
            timeout: Some("1".to_string()),
            ..TableFlags::default()
        };
        let options = DebugTable::Originators
            .query_options(&flags, "bat0", false)
            .unwrap();
        let hosts = hosts_with(&[(mac(2), "relay")]);

        let mut out = Vec::<u8>::new();
        debugfs::print_table(&layout, DebugTable::Originators, &options, &hosts, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("            relay    0.420s"));
    }

    #[test]
    fn test_per_interface_file() {
        let scratch = Scratch::new("debugfs-if");
        let layout = scratch.layout();
        let dir = layout.debugfs_dir("eth1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("originators"), ORIGINATORS).unwrap();

        let mut options = QueryOptions::new("bat0");
        options.orig_iface = Some("eth1".to_string());
        options.read_flags = ReadFlags::empty();

        let mut out = Vec::<u8>::new();
        debugfs::print_table(
            &layout,
            DebugTable::Originators,
            &options,
            &bat_hosts::BatHosts::empty(),
            &mut out,
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ORIGINATORS);
    }

    #[test]
    fn test_missing_table_file() {
        let scratch = Scratch::new("debugfs-missing");
        let layout = scratch.layout();
        fs::create_dir_all(layout.debugfs_dir("bat0")).unwrap();

        let err = debugfs::print_table(
            &layout,
            DebugTable::BlaClaim,
            &QueryOptions::new("bat0"),
            &bat_hosts::BatHosts::empty(),
            &mut Vec::<u8>::new(),
        )
        .unwrap_err();
        assert!(Error::from(err).to_string().starts_with("Error - can't open file '"));
    }
}

// ============================================================================
// Tests for settings files
// ============================================================================
mod test_settings {
    use super::*;
    use crate::sysfs::*;

    fn mesh_scratch(tag: &str) -> (Scratch, std::path::PathBuf) {
        let scratch = Scratch::new(tag);
        let dir = scratch.layout().mesh_dir("bat0");
        fs::create_dir_all(&dir).unwrap();
        (scratch, dir)
    }

    #[test]
    fn test_short_name_writes_sysfs_file() {
        let (scratch, dir) = mesh_scratch("setting");
        assert!(scratch.layout().is_mesh_iface("bat0", None));

        let setting = Setting::find("ag").unwrap();
        setting.write(&dir, "1", None).unwrap();
        assert_eq!(fs::read_to_string(dir.join("aggregated_ogms")).unwrap(), "1");
        assert_eq!(setting.read(&dir).unwrap(), "1");
    }

    #[test]
    fn test_invalid_value_lists_allowed() {
        let (_scratch, dir) = mesh_scratch("setting-invalid");

        let err = Setting::find("bonding")
            .unwrap()
            .write(&dir, "maybe", None)
            .unwrap_err();
        assert_eq!(err.allowed(), PARAM_ENABLE);

        let err = Error::from(err);
        assert_eq!(err.to_string(), "Error - the supplied argument is invalid: maybe");
        assert!(!dir.join("bonding").exists());
    }

    #[test]
    fn test_free_value_with_extra_argument() {
        let (_scratch, dir) = mesh_scratch("setting-extra");
        Setting::find("mark")
            .unwrap()
            .write(&dir, "0x10", Some("0xff"))
            .unwrap();
        assert_eq!(fs::read_to_string(dir.join("isolation_mark")).unwrap(), "0x10 0xff");
    }

    #[test]
    fn test_vlan_settings_below_parent_mesh() {
        let scratch = Scratch::new("setting-vlan");
        let layout = scratch.layout();
        fs::create_dir_all(layout.vlan_dir("bat0", 12)).unwrap();

        assert!(layout.is_mesh_iface("bat0.12", Some(("bat0", 12))));
        assert!(!layout.is_mesh_iface("bat0.12", None));
        assert_eq!(
            layout.settings_dir("bat0.12", Some(("bat0", 12))),
            layout.vlan_dir("bat0", 12)
        );
    }

    #[test]
    fn test_gateway_client_round() {
        let (_scratch, dir) = mesh_scratch("gw");
        write_gw_mode(&dir, "client", Some("20")).unwrap();
        assert_eq!(read_gw_mode(&dir).unwrap(), "client (selection class: 20)");

        write_gw_mode(&dir, "off", Some("ignored")).unwrap();
        assert_eq!(read_gw_mode(&dir).unwrap(), "off");
    }

    #[test]
    fn test_log_levels_written_as_mask() {
        let (_scratch, dir) = mesh_scratch("loglevel");
        let level = parse_log_levels(&["tt", "bla"]).unwrap();
        write_log_level(&dir, level).unwrap();

        let rendered = render_log_level(read_log_level(&dir).unwrap());
        assert!(rendered.starts_with("[ ] all debug output disabled (none)\n"));
        assert!(rendered.contains("[x] messages related to translation table operations (tt)\n"));
        assert!(rendered.contains("[x] messages related to bridge loop avoidance (bla)\n"));
        assert!(rendered.contains("[ ] messages related to multicast (mcast)\n"));
    }

    #[test]
    fn test_ownership_of_hard_interface() {
        let scratch = Scratch::new("owner");
        let layout = scratch.layout();
        let hardif = layout.hardif_dir("eth0");
        fs::create_dir_all(&hardif).unwrap();
        fs::write(hardif.join("mesh_iface"), "bat1\n").unwrap();

        let err = Error::from(check_ownership(&layout, "bat0", "eth0").unwrap_err());
        assert_eq!(
            err.to_string(),
            "Error - interface eth0 is part of batman network bat1, not bat0"
        );
        assert!(check_ownership(&layout, "bat1", "eth0").is_ok());
    }
}

// ============================================================================
// Tests for the crate error taxonomy
// ============================================================================
mod test_error_mapping {
    use super::*;

    #[test]
    fn test_not_mesh_iface_message() {
        assert_eq!(
            Error::NotMeshIface("wlan0".to_string()).to_string(),
            "Error - interface wlan0 is not present or not a batman-adv interface"
        );
    }

    #[test]
    fn test_only_printed_kernel_errors_stay_silent() {
        let err = Error::Reported(libc::ENODEV);
        assert!(err.is_reported());
        assert!(!err.is_not_supported());
        assert!(err.usage_text().is_none());

        let err = Error::Kernel(libc::ENODEV);
        assert!(!err.is_reported());
        assert_eq!(err.to_string(), format!("Error - {}", strerror(libc::ENODEV)));
    }

    #[cfg(target_os = "linux")]
    fn dat_cache_error(reply: Vec<u8>) -> Error {
        use crate::netlink::session::GenlSession;
        use crate::netlink::tables::{DebugTable, print_table};
        use kernel::{MeshOnly, Scripted};

        let mut session = GenlSession::with_transport(Scripted::with_family(vec![reply])).unwrap();
        let mut options = QueryOptions::new("bat0");
        options.read_flags = ReadFlags::SKIP_HEADER;

        let mut out = Vec::<u8>::new();
        let err = print_table(
            &mut session,
            DebugTable::DatCache,
            &options,
            &hosts_with(&[]),
            &MeshOnly,
            &mut out,
        )
        .unwrap_err();
        assert!(out.is_empty());
        Error::from(err)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unprinted_kernel_errors_reach_the_user() {
        use crate::netlink::message::MessageBuilder;
        use crate::netlink::structures::NLMSG_OVERRUN;

        let overrun = MessageBuilder::new(NLMSG_OVERRUN, 0, 2).finish();
        let err = dat_cache_error(overrun);
        assert!(!err.is_reported());
        assert_eq!(err.to_string(), format!("Error - {}", strerror(libc::ENOBUFS)));

        // the dispatcher already printed this one
        let err = dat_cache_error(kernel::done(libc::ENODEV));
        assert!(err.is_reported());
    }

    #[test]
    fn test_protocol_unsupported_triggers_fallback() {
        assert!(Error::ProtocolUnsupported("batadv".to_string()).is_not_supported());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_interface_usage_errors_carry_usage() {
        let err = Error::from(interface::InterfaceAction::parse(&["add"]).unwrap_err());
        assert_eq!(err.usage_text(), Some(interface::USAGE));

        let err = Error::from(interface::InterfaceError::ModuleNotLoaded);
        assert_eq!(err.usage_text(), None);
        assert_eq!(err.to_string(), "Error - batman-adv module has not been loaded");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unknown_tp_destination() {
        let hosts = hosts_with(&[(mac(9), "gw")]);
        assert_eq!(hosts.resolve("gw"), Some(mac(9)));
        assert_eq!(hosts.resolve("02:00:00:00:00:0e"), Some(mac(0x0e)));
        assert_eq!(hosts.resolve("nowhere"), None);

        let err = Error::from(tp_meter::TpError::BadDestination("nowhere".to_string()));
        assert_eq!(
            err.to_string(),
            "Error - the tp meter destination is not a mac address or bat-host name: nowhere"
        );
    }
}

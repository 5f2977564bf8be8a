// ============================================================================
// batctl - Command Line Entry Point
// ============================================================================
//
// Parses the command line, loads bat-hosts when names are wanted and hands
// each subcommand to the library. Every failure travels back here as a
// `batctl::Error`, is printed once to stderr and becomes exit code 1.
//
// Architecture:
// - Tables: netlink dump first, debugfs file when the module has no netlink
// - Settings: plain sysfs attribute files below the mesh interface
// - tp: request on one socket, result on a multicast listener, Ctrl-C
//   cancels the running test
// - interface: rtnetlink link management
//
// Output:
// - stdout carries tables and values only
// - stderr carries diagnostics and the tracing log (RUST_LOG, default warn)
//
// ============================================================================

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use batctl::bat_hosts::BatHosts;
use batctl::interface::{InterfaceAction, InterfaceError, InterfaceManager};
use batctl::netlink::rtnl::RtnlHandle;
use batctl::netlink::session::{InterfaceResolver, SystemInterfaces, require_index};
use batctl::netlink::{DebugTable, GenlSession, TableFlags};
use batctl::sysfs::{self, LOG_LEVEL_USAGE, Setting, SysfsLayout};
use batctl::tcpdump::{self, DumpOptions};
use batctl::tp_meter::{self, CancelToken, TpRequest};
use batctl::{DEFAULT_MESH_IFACE, Error, MESH_IFACE_ENV, QueryOptions, ReadFlags};

#[cfg(feature = "legacy_debugfs")]
use batctl::debugfs;

#[cfg(feature = "netlink")]
use batctl::netlink::tables;

// ============================================================================
// COMPILE-TIME PLATFORM CHECK
// ============================================================================

#[cfg(not(target_os = "linux"))]
compile_error!("batctl talks to the Linux batman-adv module and builds on Linux only");

// ============================================================================
// COMMAND LINE
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "batctl",
    version,
    about = "Control and diagnostic client for the batman-adv mesh kernel module"
)]
struct Cli {
    /// batman-adv mesh interface to operate on
    #[arg(
        short = 'm',
        long = "meshif",
        value_name = "iface",
        env = MESH_IFACE_ENV,
        default_value = DEFAULT_MESH_IFACE
    )]
    mesh_iface: String,

    /// Print table records as JSON
    #[arg(short = 'j', long = "json")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Switches shared by every table command
#[derive(Args, Debug, Clone, Default)]
struct TableArgs {
    /// Don't replace mac addresses with bat-host names
    #[arg(short = 'n')]
    no_names: bool,

    /// Don't show the header
    #[arg(short = 'H')]
    no_header: bool,

    /// Watch mode: refresh the table continuously
    #[arg(
        short = 'w',
        value_name = "interval",
        num_args = 0..=1,
        default_missing_value = "1"
    )]
    watch: Option<String>,

    /// Don't print originators not seen for x.y seconds
    #[arg(short = 't', value_name = "timeout")]
    timeout: Option<String>,

    /// Originator table of a specific hard interface
    #[arg(short = 'i', value_name = "interface")]
    orig_iface: Option<String>,

    /// Print unicast mac addresses only
    #[arg(short = 'u')]
    unicast_only: bool,

    /// Print multicast mac addresses only
    #[arg(short = 'm')]
    multicast_only: bool,
}

impl From<TableArgs> for TableFlags {
    fn from(args: TableArgs) -> Self {
        TableFlags {
            no_names: args.no_names,
            no_header: args.no_header,
            watch: args.watch,
            timeout: args.timeout,
            orig_iface: args.orig_iface,
            unicast_only: args.unicast_only,
            multicast_only: args.multicast_only,
        }
    }
}

#[derive(Args, Debug)]
struct TpArgs {
    /// Test length in milliseconds (kernel default when omitted)
    #[arg(short = 't', value_name = "time")]
    time: Option<u32>,

    /// Don't convert addresses to bat-host names
    #[arg(short = 'n')]
    no_names: bool,

    /// Destination mac address or bat-host name
    destination: Option<String>,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Capture every ethertype, not only batman-adv frames
    #[arg(short = 'a')]
    all_types: bool,

    /// Hex dump of every printed frame
    #[arg(short = 'd')]
    hex_dump: bool,

    /// Interface to capture on
    iface: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Neighbor table
    #[command(name = "neighbors", visible_alias = "n")]
    Neighbors(TableArgs),

    /// Originator table
    #[command(name = "originators", visible_alias = "o")]
    Originators(TableArgs),

    /// Local translation table
    #[command(name = "translocal", visible_alias = "tl")]
    TransLocal(TableArgs),

    /// Global translation table
    #[command(name = "transglobal", visible_alias = "tg")]
    TransGlobal(TableArgs),

    /// Gateway list
    #[command(name = "gateways", visible_alias = "gwl")]
    Gateways(TableArgs),

    /// Bridge loop avoidance claim table
    #[command(name = "claimtable", visible_alias = "cl")]
    ClaimTable(TableArgs),

    /// Bridge loop avoidance backbone table
    #[command(name = "backbonetable", visible_alias = "bbt")]
    BackboneTable(TableArgs),

    /// Distributed ARP table cache
    #[command(name = "dat_cache", visible_alias = "dc")]
    DatCache(TableArgs),

    /// Display or modify the gateway mode
    #[command(name = "gw_mode", visible_alias = "gw")]
    GwMode {
        mode: Option<String>,
        /// Selection class (client) or announced bandwidth (server)
        parameter: Option<String>,
    },

    /// Display or modify the debug log level
    #[command(name = "loglevel", visible_alias = "ll")]
    LogLevel { levels: Vec<String> },

    /// Display or modify the routing algorithm
    #[command(name = "routing_algo", visible_alias = "ra")]
    RoutingAlgo { algo: Option<String> },

    /// Display or modify the hard interfaces of the mesh
    #[command(name = "interface", visible_alias = "if")]
    Interface { args: Vec<String> },

    /// Originator announcing a client mac address
    #[command(name = "translate", visible_alias = "t")]
    Translate { target: String },

    /// Throughput meter
    #[command(name = "tp")]
    Tp(TpArgs),

    /// Print batman-adv frames seen on an interface
    #[command(name = "tcpdump", visible_alias = "td")]
    Tcpdump(DumpArgs),

    /// Mesh settings (aggregation, bonding, ap_isolation, ...)
    #[command(external_subcommand)]
    Setting(Vec<String>),
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(mesh_iface = %cli.mesh_iface, command = ?cli.command, "starting");

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// Print a failure the way the command line tool always has
fn report(e: &Error) {
    tracing::debug!(error = ?e, "command failed");
    if e.is_reported() {
        return;
    }

    let mut stderr = io::stderr().lock();
    let message = e.to_string();
    if !message.is_empty() {
        let _ = writeln!(stderr, "{message}");
    }

    if let Error::Settings(settings) = e
        && !settings.allowed().is_empty()
    {
        let _ = writeln!(stderr, "The following values are allowed:");
        for value in settings.allowed() {
            let _ = writeln!(stderr, " * {value}");
        }
    }

    if let Some(usage) = e.usage_text() {
        let _ = stderr.write_all(usage.as_bytes());
    }
}

/// Run the parsed command; `Ok(false)` exits 1 without a further message
fn run(cli: Cli) -> Result<bool, Error> {
    let Cli {
        mesh_iface,
        json,
        command,
    } = cli;
    let layout = SysfsLayout::from_env();
    let mut out = io::stdout().lock();
    let mut err = io::stderr();

    let table = |table: DebugTable, args: TableArgs, out: &mut dyn Write| {
        run_table(&layout, table, args.into(), &mesh_iface, json, out)
    };

    match command {
        Commands::Neighbors(args) => table(DebugTable::Neighbors, args, &mut out)?,
        Commands::Originators(args) => table(DebugTable::Originators, args, &mut out)?,
        Commands::TransLocal(args) => table(DebugTable::TransLocal, args, &mut out)?,
        Commands::TransGlobal(args) => table(DebugTable::TransGlobal, args, &mut out)?,
        Commands::Gateways(args) => table(DebugTable::Gateways, args, &mut out)?,
        Commands::ClaimTable(args) => table(DebugTable::BlaClaim, args, &mut out)?,
        Commands::BackboneTable(args) => table(DebugTable::BlaBackbone, args, &mut out)?,
        Commands::DatCache(args) => table(DebugTable::DatCache, args, &mut out)?,
        Commands::GwMode { mode, parameter } => {
            let dir = mesh_dir(&layout, &mesh_iface)?;
            match mode.as_deref() {
                None => writeln!(out, "{}", sysfs::read_gw_mode(&dir)?)?,
                Some(mode) => sysfs::write_gw_mode(&dir, mode, parameter.as_deref())?,
            }
        }
        Commands::LogLevel { levels } => run_loglevel(&layout, &mesh_iface, &levels, &mut out)?,
        Commands::RoutingAlgo { algo } => run_routing_algo(&layout, algo.as_deref(), &mut out)?,
        Commands::Interface { args } => {
            let action = InterfaceAction::parse(&args)?;
            let mut manager = InterfaceManager {
                rtnl: RtnlHandle::open().map_err(InterfaceError::Rtnl)?,
                layout: &layout,
                resolver: &SystemInterfaces,
                mesh_iface: &mesh_iface,
            };
            manager.run(&action, &mut out, &mut err)?;
        }
        Commands::Translate { target } => {
            let hosts = load_hosts(true);
            let mac = hosts
                .resolve(&target)
                .ok_or_else(|| Error::Unresolved(target.clone()))?;
            let mesh_ifindex = require_index(&SystemInterfaces, &mesh_iface)?;
            let mut session = GenlSession::open()?;
            let originator = session.translate_mac(mesh_ifindex, mac)?;
            writeln!(out, "{originator}")?;
        }
        Commands::Tp(args) => return run_tp(&mesh_iface, args, &mut out, &mut err),
        Commands::Tcpdump(args) => {
            let Some(iface) = args.iface else {
                return Err(Error::usage(
                    "Error - target interface not specified",
                    tcpdump::USAGE,
                ));
            };
            let options = DumpOptions {
                all_types: args.all_types,
                hex_dump: args.hex_dump,
            };
            tcpdump::run(&iface, options, &mut out)?;
        }
        Commands::Setting(args) => run_setting(&layout, &mesh_iface, &args, &mut out)?,
    }

    out.flush()?;
    Ok(true)
}

// ============================================================================
// TABLES
// ============================================================================

fn load_hosts(use_names: bool) -> BatHosts {
    if use_names {
        BatHosts::load(&BatHosts::default_paths())
    } else {
        BatHosts::empty()
    }
}

fn run_table(
    layout: &SysfsLayout,
    table: DebugTable,
    flags: TableFlags,
    mesh_iface: &str,
    json: bool,
    out: &mut dyn Write,
) -> Result<(), Error> {
    let options = table.query_options(&flags, mesh_iface, json)?;
    if let Some(hard_iface) = &options.orig_iface {
        sysfs::check_ownership(layout, mesh_iface, hard_iface)?;
    }

    let hosts = load_hosts(options.read_flags.contains(ReadFlags::USE_BAT_HOSTS));
    tracing::debug!(table = table.name(), hosts = hosts.len(), "printing table");

    match netlink_table(table, &options, &hosts, out) {
        Err(e) if e.is_not_supported() => {
            tracing::debug!(table = table.name(), "netlink table not supported");
            debugfs_table(layout, table, &options, &hosts, out)
        }
        result => result,
    }
}

#[cfg(feature = "netlink")]
fn netlink_table(
    table: DebugTable,
    options: &QueryOptions,
    hosts: &BatHosts,
    out: &mut dyn Write,
) -> Result<(), Error> {
    let mut session = GenlSession::open()?;
    tables::print_table(&mut session, table, options, hosts, &SystemInterfaces, out)?;
    Ok(())
}

#[cfg(not(feature = "netlink"))]
fn netlink_table(
    _table: DebugTable,
    _options: &QueryOptions,
    _hosts: &BatHosts,
    _out: &mut dyn Write,
) -> Result<(), Error> {
    Err(Error::Kernel(libc::EOPNOTSUPP))
}

#[cfg(feature = "legacy_debugfs")]
fn debugfs_table(
    layout: &SysfsLayout,
    table: DebugTable,
    options: &QueryOptions,
    hosts: &BatHosts,
    out: &mut dyn Write,
) -> Result<(), Error> {
    debugfs::print_table(layout, table, options, hosts, out)?;
    Ok(())
}

#[cfg(not(feature = "legacy_debugfs"))]
fn debugfs_table(
    _layout: &SysfsLayout,
    _table: DebugTable,
    options: &QueryOptions,
    _hosts: &BatHosts,
    _out: &mut dyn Write,
) -> Result<(), Error> {
    Err(Error::ProtocolUnsupported(options.mesh_iface.clone()))
}

// ============================================================================
// ROUTING ALGORITHM
// ============================================================================

fn run_routing_algo(
    layout: &SysfsLayout,
    algo: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), Error> {
    if let Some(algo) = algo {
        sysfs::write_routing_algo(layout, algo)?;
        return Ok(());
    }

    let active = sysfs::active_routing_algos(layout)?;
    if !active.is_empty() {
        writeln!(out, "Active routing protocol configuration:")?;
        for (iface, algo) in &active {
            writeln!(out, " * {iface}: {algo}")?;
        }
        writeln!(out)?;
    }

    let selected = sysfs::selected_routing_algo(layout)?;
    writeln!(out, "Selected routing algorithm (used when next batX interface is created):")?;
    writeln!(out, " => {selected}")?;

    let listed = GenlSession::open()
        .and_then(|mut session| session.print_routing_algos(out))
        .map_err(Error::from);
    match listed {
        Err(e) if e.is_not_supported() => debugfs_routing_algos(layout, out),
        result => result,
    }
}

#[cfg(feature = "legacy_debugfs")]
fn debugfs_routing_algos(layout: &SysfsLayout, out: &mut dyn Write) -> Result<(), Error> {
    debugfs::print_routing_algos(layout, out)?;
    Ok(())
}

#[cfg(not(feature = "legacy_debugfs"))]
fn debugfs_routing_algos(_layout: &SysfsLayout, _out: &mut dyn Write) -> Result<(), Error> {
    Ok(())
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Mesh directory for commands that ignore VLANs
fn mesh_dir(layout: &SysfsLayout, mesh_iface: &str) -> Result<PathBuf, Error> {
    if !layout.is_mesh_iface(mesh_iface, None) {
        return Err(Error::NotMeshIface(mesh_iface.to_string()));
    }
    Ok(layout.mesh_dir(mesh_iface))
}

/// Settings directory, below the parent mesh when `mesh_iface` is a VLAN
fn settings_dir(layout: &SysfsLayout, mesh_iface: &str) -> Result<PathBuf, Error> {
    let vlan = RtnlHandle::open()
        .and_then(|mut rtnl| rtnl.vlan_link(mesh_iface))
        .unwrap_or_else(|e| {
            tracing::debug!(iface = mesh_iface, error = %e, "vlan lookup failed");
            None
        });
    let base = vlan.and_then(|link| {
        SystemInterfaces
            .name_of(link.parent_index)
            .map(|name| (name, link.vid))
    });
    let vlan = base.as_ref().map(|(name, vid)| (name.as_str(), *vid));

    if !layout.is_mesh_iface(mesh_iface, vlan) {
        return Err(Error::NotMeshIface(mesh_iface.to_string()));
    }
    Ok(layout.settings_dir(mesh_iface, vlan))
}

fn run_setting(
    layout: &SysfsLayout,
    mesh_iface: &str,
    args: &[String],
    out: &mut dyn Write,
) -> Result<(), Error> {
    let Some((name, values)) = args.split_first() else {
        return Err(Error::usage("", Cli::command().render_help().to_string()));
    };
    let Some(setting) = Setting::find(name) else {
        return Err(Error::usage(
            format!("Error - no valid command or debug table specified: {name}"),
            Cli::command().render_help().to_string(),
        ));
    };

    if let Some(option) = values.first().filter(|value| value.starts_with('-')) {
        if option == "-h" {
            out.write_all(setting.usage().as_bytes())?;
            return Ok(());
        }
        return Err(Error::usage(
            format!("Error - unrecognised option '{option}'"),
            setting.usage(),
        ));
    }

    let dir = settings_dir(layout, mesh_iface)?;
    match values {
        [] => out.write_all(setting.read(&dir)?.as_bytes())?,
        [value, rest @ ..] => setting.write(&dir, value, rest.first().map(String::as_str))?,
    }
    Ok(())
}

fn run_loglevel(
    layout: &SysfsLayout,
    mesh_iface: &str,
    levels: &[String],
    out: &mut dyn Write,
) -> Result<(), Error> {
    let dir = mesh_dir(layout, mesh_iface)?;
    if levels.is_empty() {
        let level = sysfs::read_log_level(&dir)?;
        out.write_all(sysfs::render_log_level(level).as_bytes())?;
        return Ok(());
    }

    let level = sysfs::parse_log_levels(levels)
        .map_err(|e| Error::usage(format!("Error - {e}"), LOG_LEVEL_USAGE))?;
    sysfs::write_log_level(&dir, level)?;
    Ok(())
}

// ============================================================================
// THROUGHPUT METER
// ============================================================================

fn run_tp(
    mesh_iface: &str,
    args: TpArgs,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<bool, Error> {
    let Some(destination) = args.destination else {
        return Err(Error::usage("", tp_meter::USAGE));
    };

    let token = CancelToken::install().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "no interrupt handler, the test can't be cancelled");
        CancelToken::new()
    });

    let request = TpRequest {
        mesh_iface: mesh_iface.to_string(),
        destination,
        test_time_ms: args.time.unwrap_or(0),
    };
    let hosts = load_hosts(!args.no_names);

    Ok(tp_meter::run(&request, &hosts, &SystemInterfaces, &token, out, err)?)
}

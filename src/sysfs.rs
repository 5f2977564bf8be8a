//! Sysfs attribute files
//!
//! Mesh settings live in text files with one value per line:
//!
//! ```text
//! /sys/class/net/{mesh}/mesh/{setting}
//! /sys/class/net/{mesh}/mesh/vlan{vid}/{setting}     VLAN on top of a mesh
//! /sys/class/net/{hard}/batman_adv/{iface_status,mesh_iface}
//! /sys/module/batman_adv/{version,parameters/routing_algo}
//! ```
//!
//! Values are validated against the allowed set before anything is
//! written, so a typo never reaches the kernel.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable relocating every sysfs/debugfs path below a prefix
pub const SYSFS_ROOT_ENV: &str = "BATCTL_SYSFS_ROOT";

/// Accepted values of boolean settings
pub const PARAM_ENABLE: &[&str] = &["enable", "disable", "1", "0"];

/// Accepted gateway modes
pub const PARAM_GW_MODE: &[&str] = &["off", "client", "server"];

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("can't open file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("the supplied argument is invalid: {value}")]
    InvalidValue {
        value: String,
        allowed: &'static [&'static str],
    },

    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),

    #[error("interface {hard_iface} is part of batman network {actual}, not {mesh_iface}")]
    NotOwned {
        hard_iface: String,
        actual: String,
        mesh_iface: String,
    },

    #[error("batman-adv module has not been loaded")]
    ModuleNotLoaded,
}

impl SettingsError {
    /// Allowed values to list after an `InvalidValue`
    #[must_use]
    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            SettingsError::InvalidValue { allowed, .. } => allowed,
            _ => &[],
        }
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

/// Where the kernel's virtual filesystems are found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsLayout {
    root: PathBuf,
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self::with_root("/")
    }
}

impl SysfsLayout {
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `/`, or the directory named by `BATCTL_SYSFS_ROOT`
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var_os(SYSFS_ROOT_ENV) {
            Some(root) if !root.is_empty() => Self::with_root(root),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn class_net(&self) -> PathBuf {
        self.root.join("sys/class/net")
    }

    #[must_use]
    pub fn mesh_dir(&self, mesh_iface: &str) -> PathBuf {
        self.class_net().join(mesh_iface).join("mesh")
    }

    #[must_use]
    pub fn vlan_dir(&self, base_iface: &str, vid: u16) -> PathBuf {
        self.mesh_dir(base_iface).join(format!("vlan{vid}"))
    }

    #[must_use]
    pub fn hardif_dir(&self, hard_iface: &str) -> PathBuf {
        self.class_net().join(hard_iface).join("batman_adv")
    }

    #[must_use]
    pub fn module_version(&self) -> PathBuf {
        self.root.join("sys/module/batman_adv/version")
    }

    #[must_use]
    pub fn routing_algo_param(&self) -> PathBuf {
        self.root.join("sys/module/batman_adv/parameters/routing_algo")
    }

    /// batman-adv directory of a mounted debugfs
    #[must_use]
    pub fn debugfs_root(&self) -> PathBuf {
        self.root.join("sys/kernel/debug/batman_adv")
    }

    #[must_use]
    pub fn debugfs_dir(&self, iface: &str) -> PathBuf {
        self.debugfs_root().join(iface)
    }

    #[must_use]
    pub fn module_loaded(&self) -> bool {
        self.module_version().exists()
    }

    /// Settings directory of `iface`; `vlan` names the mesh below a VLAN
    #[must_use]
    pub fn settings_dir(&self, iface: &str, vlan: Option<(&str, u16)>) -> PathBuf {
        match vlan {
            Some((base, vid)) => self.vlan_dir(base, vid),
            None => self.mesh_dir(iface),
        }
    }

    /// Whether `iface` (or the mesh below the VLAN) has a settings directory
    #[must_use]
    pub fn is_mesh_iface(&self, iface: &str, vlan: Option<(&str, u16)>) -> bool {
        self.settings_dir(iface, vlan).is_dir()
    }
}

// ============================================================================
// FILE ACCESS
// ============================================================================

/// Whole file content
///
/// # Errors
///
/// `Io` naming the path.
pub fn read_raw(path: &Path) -> Result<String, SettingsError> {
    fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// First line without its newline
///
/// # Errors
///
/// `Io` naming the path.
pub fn read_value(path: &Path) -> Result<String, SettingsError> {
    let content = read_raw(path)?;
    Ok(content.lines().next().unwrap_or_default().to_string())
}

/// Write `value`, followed by ` {extra}` when given
///
/// # Errors
///
/// `Io` naming the path.
pub fn write_value(path: &Path, value: &str, extra: Option<&str>) -> Result<(), SettingsError> {
    let text = match extra {
        Some(extra) => format!("{value} {extra}"),
        None => value.to_string(),
    };

    tracing::debug!(path = %path.display(), value = %text, "writing sysfs attribute");
    fs::write(path, text).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// SETTINGS
// ============================================================================

/// One mesh setting command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub long: &'static str,
    pub short: &'static str,
    pub file: &'static str,
    /// `None` accepts any value
    pub params: Option<&'static [&'static str]>,
}

pub static SETTINGS: [Setting; 10] = [
    Setting::new("orig_interval", "it", "orig_interval", None),
    Setting::new("ap_isolation", "ap", "ap_isolation", Some(PARAM_ENABLE)),
    Setting::new(
        "bridge_loop_avoidance",
        "bl",
        "bridge_loop_avoidance",
        Some(PARAM_ENABLE),
    ),
    Setting::new(
        "distributed_arp_table",
        "dat",
        "distributed_arp_table",
        Some(PARAM_ENABLE),
    ),
    Setting::new("aggregation", "ag", "aggregated_ogms", Some(PARAM_ENABLE)),
    Setting::new("bonding", "b", "bonding", Some(PARAM_ENABLE)),
    Setting::new("fragmentation", "f", "fragmentation", Some(PARAM_ENABLE)),
    Setting::new("network_coding", "nc", "network_coding", Some(PARAM_ENABLE)),
    Setting::new("isolation_mark", "mark", "isolation_mark", None),
    Setting::new("multicast_mode", "mm", "multicast_mode", Some(PARAM_ENABLE)),
];

impl Setting {
    const fn new(
        long: &'static str,
        short: &'static str,
        file: &'static str,
        params: Option<&'static [&'static str]>,
    ) -> Self {
        Self {
            long,
            short,
            file,
            params,
        }
    }

    /// Look a setting up by long or short command name
    #[must_use]
    pub fn find(name: &str) -> Option<&'static Setting> {
        SETTINGS.iter().find(|s| s.long == name || s.short == name)
    }

    /// # Errors
    ///
    /// `InvalidValue` when `value` is not in the allowed set.
    pub fn validate(&self, value: &str) -> Result<(), SettingsError> {
        match self.params {
            Some(allowed) if !allowed.contains(&value) => Err(SettingsError::InvalidValue {
                value: value.to_string(),
                allowed,
            }),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn usage(&self) -> String {
        let suffix = match self.params {
            Some(params) if params == PARAM_ENABLE => " [0|1]",
            Some(params) if params == PARAM_GW_MODE => " [client|server]",
            _ => "",
        };
        format!(
            "Usage: batctl [options] {}|{} [parameters]{}\nparameters:\n \t -h print this help\n",
            self.long, self.short, suffix
        )
    }

    /// Current file content, unmodified
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read.
    pub fn read(&self, dir: &Path) -> Result<String, SettingsError> {
        read_raw(&dir.join(self.file))
    }

    /// Validate and write a new value
    ///
    /// # Errors
    ///
    /// `InvalidValue` (nothing written) or `Io`.
    pub fn write(&self, dir: &Path, value: &str, extra: Option<&str>) -> Result<(), SettingsError> {
        self.validate(value)?;
        write_value(&dir.join(self.file), value, extra)
    }
}

// ============================================================================
// GATEWAY MODE
// ============================================================================

pub const GW_MODE_FILE: &str = "gw_mode";
pub const GW_SEL_CLASS_FILE: &str = "gw_sel_class";
pub const GW_BANDWIDTH_FILE: &str = "gw_bandwidth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GwMode {
    Off,
    Client,
    Server,
}

impl GwMode {
    /// Anything unknown reads as `Off`
    #[must_use]
    pub fn from_file(value: &str) -> Self {
        match value.trim() {
            "client" => GwMode::Client,
            "server" => GwMode::Server,
            _ => GwMode::Off,
        }
    }

    /// # Errors
    ///
    /// `InvalidValue` listing the three modes.
    pub fn parse(value: &str) -> Result<Self, SettingsError> {
        match value {
            "off" => Ok(GwMode::Off),
            "client" => Ok(GwMode::Client),
            "server" => Ok(GwMode::Server),
            _ => Err(SettingsError::InvalidValue {
                value: value.to_string(),
                allowed: PARAM_GW_MODE,
            }),
        }
    }

    /// File holding the mode's extra parameter
    #[must_use]
    pub const fn parameter_file(self) -> Option<&'static str> {
        match self {
            GwMode::Off => None,
            GwMode::Client => Some(GW_SEL_CLASS_FILE),
            GwMode::Server => Some(GW_BANDWIDTH_FILE),
        }
    }
}

/// Rendered gateway mode line, without newline
///
/// # Errors
///
/// `Io` when one of the files cannot be read.
pub fn read_gw_mode(dir: &Path) -> Result<String, SettingsError> {
    let mode = GwMode::from_file(&read_value(&dir.join(GW_MODE_FILE))?);
    let Some(file) = mode.parameter_file() else {
        return Ok("off".to_string());
    };

    let parameter = read_value(&dir.join(file))?;
    Ok(match mode {
        GwMode::Client => format!("client (selection class: {parameter})"),
        _ => format!("server (announced bw: {parameter})"),
    })
}

/// Write the mode and, when given, its parameter
///
/// # Errors
///
/// `InvalidValue` for an unknown mode (nothing written) or `Io`.
pub fn write_gw_mode(dir: &Path, mode: &str, parameter: Option<&str>) -> Result<(), SettingsError> {
    let parsed = GwMode::parse(mode)?;
    write_value(&dir.join(GW_MODE_FILE), mode, None)?;

    if let Some(parameter) = parameter
        && let Some(file) = parsed.parameter_file()
    {
        write_value(&dir.join(file), parameter, None)?;
    }
    Ok(())
}

// ============================================================================
// LOG LEVEL
// ============================================================================

pub const LOG_LEVEL_FILE: &str = "log_level";

/// (name, bit, description) of every debug log level
pub const LOG_LEVELS: [(&str, u32, &str); 7] = [
    ("batman", 1 << 0, "messages related to routing / flooding / broadcasting"),
    ("routes", 1 << 1, "messages related to route added / changed / deleted"),
    ("tt", 1 << 2, "messages related to translation table operations"),
    ("bla", 1 << 3, "messages related to bridge loop avoidance"),
    ("dat", 1 << 4, "messages related to arp snooping and distributed arp table"),
    ("nc", 1 << 5, "messages related to network coding"),
    ("mcast", 1 << 6, "messages related to multicast"),
];

pub const LOG_LEVEL_USAGE: &str = "Usage: batctl [options] loglevel [parameters] [level[ level[ level]]...]\n\
parameters:\n \
\t -h print this help\n\
levels:\n \
\t none    Debug logging is disabled\n \
\t all     Print messages from all below\n \
\t batman  Messages related to routing / flooding / broadcasting\n \
\t routes  Messages related to route added / changed / deleted\n \
\t tt      Messages related to translation table operations\n \
\t bla     Messages related to bridge loop avoidance\n \
\t dat     Messages related to arp snooping and distributed arp table\n \
\t nc      Messages related to network coding\n \
\t mcast   Messages related to multicast\n";

/// Combine level names into the bitmask
///
/// `none` and `all` end the list: whatever follows them is ignored.
///
/// # Errors
///
/// `UnknownLogLevel` for a name outside the table.
pub fn parse_log_levels<S: AsRef<str>>(names: &[S]) -> Result<u32, SettingsError> {
    let mut level = 0;
    for name in names {
        match name.as_ref() {
            "none" => return Ok(0),
            "all" => return Ok(63),
            other => {
                let (_, bit, _) = LOG_LEVELS
                    .iter()
                    .find(|(level_name, _, _)| *level_name == other)
                    .ok_or_else(|| SettingsError::UnknownLogLevel(other.to_string()))?;
                level |= bit;
            }
        }
    }
    Ok(level)
}

/// The `[x] description (name)` listing of `level`
#[must_use]
pub fn render_log_level(level: u32) -> String {
    let mark = |on: bool| if on { 'x' } else { ' ' };

    let mut out = format!("[{}] all debug output disabled (none)\n", mark(level == 0));
    for (name, bit, description) in LOG_LEVELS {
        out.push_str(&format!("[{}] {} ({})\n", mark(level & bit != 0), description, name));
    }
    out
}

/// # Errors
///
/// `Io` when the file cannot be read.
pub fn read_log_level(dir: &Path) -> Result<u32, SettingsError> {
    let value = read_value(&dir.join(LOG_LEVEL_FILE))?;
    // Unparsable content reads as 0, the way strtol() would
    Ok(value.trim().parse().unwrap_or(0))
}

/// # Errors
///
/// `Io` when the file cannot be written.
pub fn write_log_level(dir: &Path, level: u32) -> Result<(), SettingsError> {
    write_value(&dir.join(LOG_LEVEL_FILE), &level.to_string(), None)
}

// ============================================================================
// ROUTING ALGORITHM
// ============================================================================

/// `(iface, algorithm)` for every interface exposing `mesh/routing_algo`
///
/// Sorted by interface name.
///
/// # Errors
///
/// `Io` when `/sys/class/net` cannot be listed.
pub fn active_routing_algos(layout: &SysfsLayout) -> Result<Vec<(String, String)>, SettingsError> {
    let class_net = layout.class_net();
    let entries = fs::read_dir(&class_net).map_err(|source| SettingsError::Io {
        path: class_net.clone(),
        source,
    })?;

    let mut active: Vec<(String, String)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let iface = entry.file_name().to_string_lossy().into_owned();
            let algo = read_value(&layout.mesh_dir(&iface).join("routing_algo")).ok()?;
            Some((iface, algo))
        })
        .collect();

    active.sort();
    Ok(active)
}

/// Algorithm the next mesh interface will be created with
///
/// # Errors
///
/// `Io` when the module parameter cannot be read.
pub fn selected_routing_algo(layout: &SysfsLayout) -> Result<String, SettingsError> {
    read_value(&layout.routing_algo_param())
}

/// # Errors
///
/// `Io` when the module parameter cannot be written.
pub fn write_routing_algo(layout: &SysfsLayout, algo: &str) -> Result<(), SettingsError> {
    write_value(&layout.routing_algo_param(), algo, None)
}

// ============================================================================
// HARD INTERFACES
// ============================================================================

/// `iface_status` of a hard interface, newline included
///
/// # Errors
///
/// `Io` when the file cannot be read.
pub fn iface_status(layout: &SysfsLayout, hard_iface: &str) -> Result<String, SettingsError> {
    read_raw(&layout.hardif_dir(hard_iface).join("iface_status"))
}

/// Make sure `hard_iface` is enslaved to `mesh_iface`
///
/// # Errors
///
/// `Io` when the ownership file is unreadable, `NotOwned` when the
/// interface belongs to another mesh (or none).
pub fn check_ownership(
    layout: &SysfsLayout,
    mesh_iface: &str,
    hard_iface: &str,
) -> Result<(), SettingsError> {
    let actual = read_value(&layout.hardif_dir(hard_iface).join("mesh_iface"))?;
    if actual != mesh_iface {
        return Err(SettingsError::NotOwned {
            hard_iface: hard_iface.to_string(),
            actual,
            mesh_iface: mesh_iface.to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

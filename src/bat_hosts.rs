//! bat-hosts name resolution
//!
//! A bat-hosts file maps hardware addresses to friendly names, one
//! `mac name` pair per line. Files are read in order `/etc/bat-hosts`,
//! `~/bat-hosts`, `./bat-hosts`; later entries override earlier ones.

use crate::MacAddr;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Width that names are right-aligned to, the length of a printed address
pub const NAME_WIDTH: usize = 17;

/// Bidirectional mac/name map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatHosts {
    by_mac: HashMap<MacAddr, String>,
    by_name: HashMap<String, MacAddr>,
}

impl BatHosts {
    /// Empty map (name resolution disabled)
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Default search path
    #[must_use]
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/bat-hosts")];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(Path::new(&home).join("bat-hosts"));
        }
        paths.push(PathBuf::from("bat-hosts"));
        paths
    }

    /// Load every readable file of `paths`; unreadable ones are skipped
    #[must_use]
    pub fn load(paths: &[PathBuf]) -> Self {
        let mut hosts = Self::default();
        for path in paths {
            match File::open(path) {
                Ok(file) => hosts.merge_reader(BufReader::new(file), path),
                Err(e) => tracing::trace!(path = %path.display(), error = %e, "no bat-hosts file"),
            }
        }
        hosts
    }

    /// Parse `mac name` lines; comments and malformed lines are ignored
    pub fn merge_reader<R: BufRead>(&mut self, reader: R, origin: &Path) {
        for (line_num, line) in reader.lines().enumerate() {
            let Ok(line) = line else {
                break;
            };

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(mac), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };

            let Ok(mac) = mac.parse::<MacAddr>() else {
                tracing::debug!(
                    file = %origin.display(),
                    line = line_num + 1,
                    "skipping bat-hosts line with invalid address"
                );
                continue;
            };

            self.insert(mac, name);
        }
    }

    /// Add or replace an entry
    pub fn insert(&mut self, mac: MacAddr, name: &str) {
        if let Some(old_name) = self.by_mac.insert(mac, name.to_string()) {
            self.by_name.remove(&old_name);
        }
        if let Some(old_mac) = self.by_name.insert(name.to_string(), mac) {
            if old_mac != mac {
                self.by_mac.remove(&old_mac);
            }
        }
    }

    #[must_use]
    pub fn name_of(&self, mac: &MacAddr) -> Option<&str> {
        self.by_mac.get(mac).map(String::as_str)
    }

    #[must_use]
    pub fn mac_of(&self, name: &str) -> Option<MacAddr> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }

    /// Address as shown in tables: the padded name when known
    #[must_use]
    pub fn display(&self, mac: &MacAddr, use_names: bool) -> String {
        match self.name_of(mac) {
            Some(name) if use_names => format!("{name:>NAME_WIDTH$}"),
            _ => mac.to_string(),
        }
    }

    /// Resolve a destination given as bat-host name or address
    #[must_use]
    pub fn resolve(&self, target: &str) -> Option<MacAddr> {
        self.mac_of(target).or_else(|| target.parse().ok())
    }
}

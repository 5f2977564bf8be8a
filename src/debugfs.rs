//! Table fallback for kernel modules without netlink support
//!
//! Older batman-adv modules export every table as a text file below
//! debugfs. The file already holds the rendered table, so all that is left
//! to do here is applying the read flags line by line: header skipping,
//! staleness and unicast/multicast filters, bat-hosts names.

use crate::bat_hosts::{BatHosts, NAME_WIDTH};
use crate::netlink::session::watch;
use crate::netlink::tables::{DebugTable, TableOption};
use crate::sysfs::SysfsLayout;
use crate::{MacAddr, QueryOptions, ReadFlags};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// File listing the algorithms a debugfs-only module offers
pub const ROUTING_ALGOS_FILE: &str = "routing_algos";

#[derive(Debug, thiserror::Error)]
pub enum DebugfsError {
    #[error("can't mount or find debugfs")]
    NotMounted,

    #[error("can't open file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn is_addr_char(c: char) -> bool {
    c.is_ascii_hexdigit() || c == ':'
}

/// Split a line into alternating runs of address characters and the rest
fn segments(line: &str) -> impl Iterator<Item = (bool, &str)> {
    let mut rest = line;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let is_addr = is_addr_char(first);
        let end = rest
            .find(|c: char| is_addr_char(c) != is_addr)
            .unwrap_or(rest.len());
        let (segment, tail) = rest.split_at(end);
        rest = tail;
        Some((is_addr, segment))
    })
}

fn segment_addr(is_addr: bool, segment: &str) -> Option<MacAddr> {
    if is_addr && segment.len() == 17 {
        segment.parse().ok()
    } else {
        None
    }
}

/// Replace every known address with its right-aligned bat-hosts name
#[must_use]
pub fn replace_addresses(line: &str, hosts: &BatHosts) -> String {
    let mut out = String::with_capacity(line.len());
    for (is_addr, segment) in segments(line) {
        match segment_addr(is_addr, segment).and_then(|mac| hosts.name_of(&mac)) {
            Some(name) => out.push_str(&format!("{name:>NAME_WIDTH$}")),
            None => out.push_str(segment),
        }
    }
    out
}

fn first_address(line: &str) -> Option<MacAddr> {
    segments(line).find_map(|(is_addr, segment)| segment_addr(is_addr, segment))
}

/// Seconds of the first `x.yyys` column
fn last_seen_secs(line: &str) -> Option<f32> {
    line.split_whitespace()
        .find_map(|token| token.strip_suffix('s')?.parse().ok())
}

fn keep_line(line: &str, table: DebugTable, options: &QueryOptions) -> bool {
    let flags = options.read_flags;

    if flags.contains(ReadFlags::NO_OLD_ORIGS)
        && table.supports(TableOption::Timeout)
        && let Some(secs) = last_seen_secs(line)
        && secs > options.orig_timeout
    {
        return false;
    }

    if table.supports(TableOption::UnicastOnly)
        && let Some(client) = first_address(line)
    {
        if flags.contains(ReadFlags::UNICAST_ONLY) && client.is_multicast() {
            return false;
        }
        if flags.contains(ReadFlags::MULTICAST_ONLY) && !client.is_multicast() {
            return false;
        }
    }

    true
}

/// Apply the read flags to the content of a table file
#[must_use]
pub fn filter_table(
    content: &str,
    table: DebugTable,
    options: &QueryOptions,
    hosts: &BatHosts,
) -> String {
    let use_names = options.read_flags.contains(ReadFlags::USE_BAT_HOSTS);
    let mut out = String::with_capacity(content.len());

    for (index, line) in content.lines().enumerate() {
        if index < table.header_lines() {
            if !options.read_flags.contains(ReadFlags::SKIP_HEADER) {
                out.push_str(line);
                out.push('\n');
            }
            continue;
        }

        if !keep_line(line, table, options) {
            continue;
        }

        if use_names {
            out.push_str(&replace_addresses(line, hosts));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    out
}

/// Print `table` from its debugfs file, once or in watch mode
///
/// With `-i` the per-interface originator file is read.
///
/// # Errors
///
/// `NotMounted` without a batman-adv debugfs directory, `Read` when the
/// table file is missing (module built without the feature).
pub fn print_table(
    layout: &SysfsLayout,
    table: DebugTable,
    options: &QueryOptions,
    hosts: &BatHosts,
    out: &mut dyn Write,
) -> Result<(), DebugfsError> {
    if !layout.debugfs_root().is_dir() {
        return Err(DebugfsError::NotMounted);
    }

    let iface = options.orig_iface.as_deref().unwrap_or(&options.mesh_iface);
    let path = layout.debugfs_dir(iface).join(table.debugfs_name());
    tracing::debug!(path = %path.display(), "falling back to debugfs table");

    watch(options, out, |out| {
        let content = fs::read_to_string(&path).map_err(|source| DebugfsError::Read {
            path: path.clone(),
            source,
        })?;
        out.write_all(filter_table(&content, table, options, hosts).as_bytes())?;
        Ok(())
    })
}

/// Print the routing algorithm list of a debugfs-only module
///
/// # Errors
///
/// `NotMounted` or `Read`.
pub fn print_routing_algos(layout: &SysfsLayout, out: &mut dyn Write) -> Result<(), DebugfsError> {
    let root = layout.debugfs_root();
    if !root.is_dir() {
        return Err(DebugfsError::NotMounted);
    }

    let path = root.join(ROUTING_ALGOS_FILE);
    let content = fs::read_to_string(&path).map_err(|source| DebugfsError::Read { path, source })?;
    out.write_all(content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::Path;

    const ORIGINATORS: &str = "\
[B.A.T.M.A.N. adv 2016.5, MainIF/MAC: eth0/02:00:00:00:00:01 (bat0 BATMAN_IV)]
   Originator      last-seen (#/255)           Nexthop [outgoingIF]:   Potential nexthops ...
02:00:00:00:00:02    0.420s   (255) 02:00:00:00:00:02 [      eth0]: 02:00:00:00:00:02 (255)
02:00:00:00:00:03    5.100s   (120) 02:00:00:00:00:02 [      eth0]: 02:00:00:00:00:02 (120)
";

    const TRANSLOCAL: &str = "\
[B.A.T.M.A.N. adv 2016.5, MainIF/MAC: eth0/02:00:00:00:00:01 (bat0 BATMAN_IV)]
Locally retrieved addresses (from bat0) announced via TT (TTVN: 3 CRC: 0x1234):
 * 02:00:00:00:00:0a   -1 [.P....]   0.000   (0x5e6f7a8b)
 * 33:33:00:00:00:01   -1 [.P....]   0.000   (0x5e6f7a8b)
";

    fn hosts() -> BatHosts {
        let mut hosts = BatHosts::empty();
        hosts.merge_reader(Cursor::new("02:00:00:00:00:02 relay\n"), Path::new("t"));
        hosts
    }

    #[test]
    fn test_names_replace_addresses() {
        let line = replace_addresses("02:00:00:00:00:02    0.420s [eth0]", &hosts());
        assert_eq!(line, "            relay    0.420s [eth0]");
        assert_eq!(
            replace_addresses("eth0\t02:00:00:00:00:09", &hosts()),
            "eth0\t02:00:00:00:00:09"
        );
    }

    #[test]
    fn test_skip_header() {
        let mut options = QueryOptions::new("bat0");
        options.read_flags = ReadFlags::SKIP_HEADER;
        let text = filter_table(ORIGINATORS, DebugTable::Originators, &options, &hosts());
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("02:00:00:00:00:02"));
    }

    #[test]
    fn test_timeout_hides_old_originators() {
        let mut options = QueryOptions::new("bat0");
        options.read_flags = ReadFlags::NO_OLD_ORIGS;
        options.orig_timeout = 1.0;
        let text = filter_table(ORIGINATORS, DebugTable::Originators, &options, &hosts());
        assert!(text.contains("0.420s"));
        assert!(!text.contains("5.100s"));
    }

    #[test]
    fn test_multicast_filter() {
        let mut options = QueryOptions::new("bat0");
        options.read_flags = ReadFlags::MULTICAST_ONLY | ReadFlags::SKIP_HEADER;
        let text = filter_table(TRANSLOCAL, DebugTable::TransLocal, &options, &hosts());
        assert_eq!(text, " * 33:33:00:00:00:01   -1 [.P....]   0.000   (0x5e6f7a8b)\n");
    }

    #[test]
    fn test_default_flags_resolve_names() {
        let options = QueryOptions::new("bat0");
        let text = filter_table(ORIGINATORS, DebugTable::Originators, &options, &hosts());
        let third = text.lines().nth(2).unwrap();
        assert!(third.starts_with("            relay    0.420s"));
    }

    #[test]
    fn test_missing_debugfs() {
        let layout = SysfsLayout::with_root(std::env::temp_dir().join("batctl-no-debugfs-here"));
        let mut out = Vec::new();
        let err = print_table(
            &layout,
            DebugTable::Neighbors,
            &QueryOptions::new("bat0"),
            &BatHosts::empty(),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, DebugfsError::NotMounted));
    }
}

//! Raw frame capture on a mesh or hard interface
//!
//! An `AF_PACKET` socket bound to one interface receives whole Ethernet
//! frames. Each frame gets a one-line summary, optionally followed by a
//! hex dump of its bytes.
//!
//! ```text
//! 14:02:11 02:00:00:00:00:01 -> ff:ff:ff:ff:ff:ff  bat  60 bytes
//! ```

use crate::netlink::session::{InterfaceResolver, SystemInterfaces};
use crate::{MacAddr, strerror};
use std::io::{self, Write};
use std::os::unix::io::RawFd;

/// Ethertype of batman-adv frames
pub const ETH_P_BATMAN: u16 = 0x4305;

const ETH_HLEN: usize = 14;
const ETH_P_ARP: u16 = 0x0806;
const ETH_P_IP: u16 = 0x0800;
const ARPOP_REQUEST: u16 = 1;
const ARPOP_REPLY: u16 = 2;

/// Largest frame read in one go
pub const CAPTURE_BUFFER_SIZE: usize = 2000;

pub const USAGE: &str = "Usage: batctl tcpdump|td [options] interface\n\
\t-a all packet types\n\
\t-d packet dump in hex\n\
\t-h help\n";

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Error - can't create raw socket: {}", strerror(.0.abs()))]
    Socket(i32),

    #[error("Error - can't create raw socket (SIOCGIFINDEX): {}", strerror(.0.abs()))]
    IfIndex(i32),

    #[error("Error - can't bind raw socket: {}", strerror(.0.abs()))]
    Bind(i32),

    #[error("{0}")]
    Io(#[from] io::Error),
}

fn last_errno() -> i32 {
    io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Wall clock time of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl ClockTime {
    /// Current local time
    #[must_use]
    pub fn now() -> Self {
        // SAFETY: time(NULL) only returns the clock; localtime_r fills the
        // zeroed tm we own.
        let tm = unsafe {
            let now = libc::time(std::ptr::null_mut());
            let mut tm: libc::tm = std::mem::zeroed();
            libc::localtime_r(&now, &mut tm);
            tm
        };
        Self {
            hour: tm.tm_hour as u8,
            minute: tm.tm_min as u8,
            second: tm.tm_sec as u8,
        }
    }
}

fn be16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(offset..offset + 2)?.try_into().ok()?))
}

fn dotted(ip: &[u8]) -> String {
    ip.iter()
        .map(|octet| format!("{octet:03}"))
        .collect::<Vec<_>>()
        .join(".")
}

/// ` ARP {sender} {op}({code}) {target}` for an ARP payload
fn arp_summary(arp: &[u8]) -> String {
    let (Some(op), Some(sender), Some(target)) = (be16(arp, 6), arp.get(14..18), arp.get(24..28))
    else {
        return " ARP (truncated)".to_string();
    };

    let name = match op {
        ARPOP_REQUEST => "ARP_REQUEST",
        ARPOP_REPLY => "ARP_REPLY",
        _ => "unknown",
    };
    format!(" ARP {} {name}({op}) {}", dotted(sender), dotted(target))
}

/// One-line summary of a frame; `None` for frames shorter than a header
#[must_use]
pub fn summary_line(frame: &[u8], time: ClockTime) -> Option<String> {
    let dst = MacAddr::from_slice(frame.get(0..6)?)?;
    let src = MacAddr::from_slice(frame.get(6..12)?)?;
    let ethertype = be16(frame, 12)?;

    let kind = match ethertype {
        ETH_P_ARP => arp_summary(&frame[ETH_HLEN..]),
        ETH_P_IP => " ip ".to_string(),
        ETH_P_BATMAN => " bat ".to_string(),
        other => format!(" {other:04x} "),
    };

    Some(format!(
        "{:02}:{:02}:{:02} {src} -> {dst} {kind} {} bytes",
        time.hour,
        time.minute,
        time.second,
        frame.len()
    ))
}

/// Hex dump in rows of 16 bytes with a gap after every 8
///
/// Row labels advance by ten per row.
#[must_use]
pub fn hex_dump(frame: &[u8]) -> String {
    let mut out = String::from("\n");
    for (i, byte) in frame.iter().enumerate() {
        if i == 0 {
            out.push_str("0000| ");
        }
        if i != 0 && i % 8 == 0 {
            out.push_str("  ");
        }
        if i != 0 && i % 16 == 0 {
            out.push_str(&format!("\n{:04}| ", i / 16 * 10));
        }
        out.push_str(&format!("{byte:02x} "));
    }
    out.push_str("\n\n");
    out
}

// ============================================================================
// CAPTURE SOCKET
// ============================================================================

/// `AF_PACKET` raw socket bound to one interface
pub struct CaptureSocket {
    fd: RawFd,
    protocol: u16,
}

impl CaptureSocket {
    /// Open and bind a raw socket receiving `protocol` frames of `iface`
    ///
    /// # Errors
    ///
    /// The failed step with its errno.
    pub fn open(iface: &str, protocol: u16) -> Result<Self, CaptureError> {
        // SAFETY: plain socket(2) call, the fd is owned by Self from here on.
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                libc::c_int::from(protocol.to_be()),
            )
        };
        if fd < 0 {
            return Err(CaptureError::Socket(last_errno()));
        }
        let socket = Self { fd, protocol };

        let ifindex = SystemInterfaces
            .index_of(iface)
            .ok_or(CaptureError::IfIndex(libc::ENODEV))?;

        // SAFETY: sockaddr_ll is plain data; zeroed is a valid start value.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = protocol.to_be();
        addr.sll_ifindex = ifindex as i32;

        // SAFETY: addr outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                socket.fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(CaptureError::Bind(last_errno()));
        }

        tracing::debug!(fd, iface, ifindex, protocol, "capture socket bound");
        Ok(socket)
    }

    /// Blocking read of one frame; 0 means the socket was shut down
    ///
    /// # Errors
    ///
    /// `read(2)` failures other than `EINTR`.
    pub fn read_frame(&self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: buffer is valid for buffer.len() bytes.
            let ret = unsafe {
                libc::read(
                    self.fd,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Drop for CaptureSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned and closed exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Capture options of `batctl tcpdump`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DumpOptions {
    /// Every ethertype instead of batman-adv frames only
    pub all_types: bool,
    /// Hex dump after each summary line
    pub hex_dump: bool,
}

impl DumpOptions {
    #[must_use]
    pub fn protocol(&self) -> u16 {
        if self.all_types {
            libc::ETH_P_ALL as u16
        } else {
            ETH_P_BATMAN
        }
    }

    /// Whether a frame of `ethertype` is printed
    #[must_use]
    pub fn accepts(&self, ethertype: u16) -> bool {
        self.all_types || ethertype == ETH_P_BATMAN
    }
}

/// Write summary (and dump) for one received frame
///
/// # Errors
///
/// Write failures.
pub fn print_frame(
    frame: &[u8],
    time: ClockTime,
    options: DumpOptions,
    out: &mut dyn Write,
) -> io::Result<()> {
    let Some(ethertype) = be16(frame, 12) else {
        tracing::trace!(len = frame.len(), "runt frame ignored");
        return Ok(());
    };
    if !options.accepts(ethertype) {
        return Ok(());
    }

    if let Some(line) = summary_line(frame, time) {
        writeln!(out, "{line}")?;
    }
    if options.hex_dump {
        out.write_all(hex_dump(frame).as_bytes())?;
    }
    Ok(())
}

/// Capture on `iface` until the socket is closed
///
/// # Errors
///
/// Socket setup failures, read and write errors.
pub fn run(iface: &str, options: DumpOptions, out: &mut dyn Write) -> Result<(), CaptureError> {
    let socket = CaptureSocket::open(iface, options.protocol())?;
    let mut buffer = vec![0u8; CAPTURE_BUFFER_SIZE];

    loop {
        let len = socket.read_frame(&mut buffer)?;
        if len == 0 {
            tracing::debug!(protocol = socket.protocol, "capture socket closed");
            return Ok(());
        }
        print_frame(&buffer[..len], ClockTime::now(), options, out)?;
        out.flush()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOON: ClockTime = ClockTime {
        hour: 12,
        minute: 5,
        second: 9,
    };

    fn frame(ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xff; 6];
        frame.extend([2, 0, 0, 0, 0, 1]);
        frame.extend(ethertype.to_be_bytes());
        frame.extend(payload);
        frame
    }

    #[test]
    fn test_summary_for_batman_frame() {
        let line = summary_line(&frame(ETH_P_BATMAN, &[0; 10]), NOON).unwrap();
        assert_eq!(
            line,
            "12:05:09 02:00:00:00:00:01 -> ff:ff:ff:ff:ff:ff  bat  24 bytes"
        );
    }

    #[test]
    fn test_summary_for_other_types() {
        let line = summary_line(&frame(ETH_P_IP, &[]), NOON).unwrap();
        assert!(line.ends_with("ff:ff:ff:ff:ff:ff  ip  14 bytes"));

        let line = summary_line(&frame(0x86dd, &[]), NOON).unwrap();
        assert!(line.ends_with(" 86dd  14 bytes"));

        assert_eq!(summary_line(&[0; 10], NOON), None);
    }

    #[test]
    fn test_summary_for_arp_request() {
        let mut arp = vec![0, 1, 8, 0, 6, 4, 0, 1];
        arp.extend([2, 0, 0, 0, 0, 1]);
        arp.extend([10, 0, 0, 1]);
        arp.extend([0; 6]);
        arp.extend([10, 0, 0, 2]);

        let line = summary_line(&frame(ETH_P_ARP, &arp), NOON).unwrap();
        assert!(line.contains(" ARP 010.000.000.001 ARP_REQUEST(1) 010.000.000.002 42 bytes"));
    }

    #[test]
    fn test_hex_dump_layout() {
        let bytes: Vec<u8> = (0..18).collect();
        let dump = hex_dump(&bytes);
        assert_eq!(
            dump,
            "\n0000| 00 01 02 03 04 05 06 07   08 09 0a 0b 0c 0d 0e 0f   \n0010| 10 11 \n\n"
        );
        assert_eq!(hex_dump(&[]), "\n\n\n");
    }

    #[test]
    fn test_default_filter_only_prints_batman() {
        let options = DumpOptions::default();
        let mut out = Vec::new();
        print_frame(&frame(ETH_P_IP, &[]), NOON, options, &mut out).unwrap();
        assert!(out.is_empty());

        print_frame(&frame(ETH_P_BATMAN, &[]), NOON, options, &mut out).unwrap();
        assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_all_types_with_dump() {
        let options = DumpOptions {
            all_types: true,
            hex_dump: true,
        };
        let mut out = Vec::new();
        print_frame(&frame(ETH_P_IP, &[]), NOON, options, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(" ip "));
        assert!(text.contains("\n0000| ff ff"));
        assert_eq!(options.protocol(), libc::ETH_P_ALL as u16);
    }
}

//! Netlink socket management
//!
//! Provides a safe wrapper around the AF_NETLINK socket lifecycle.
//! Uses RAII (Resource Acquisition Is Initialization) so the socket is
//! always closed when dropped.
//!
//! # Platform Support
//!
//! **Linux only:** Netlink is a Linux-specific kernel interface.
//!
//! # Educational Notes
//!
//! ## One socket per logical session
//!
//! Every query opens its own socket, sends exactly one request and reads
//! until the dispatcher reports the end of the exchange:
//! ```rust,ignore
//! {
//!     let socket = NetlinkSocket::new(NetlinkProtocol::Generic)?;
//!     socket.send(&request)?;
//!     let n = socket.recv(&mut buffer)?;
//! }  // Socket closed here, pending kernel replies are discarded with it
//! ```
//!
//! The throughput meter is the one place that holds two sockets at once:
//! a command socket and a listener that joined the `tpmeter` multicast
//! group. Joining a group is a `setsockopt(SOL_NETLINK,
//! NETLINK_ADD_MEMBERSHIP)` on an already bound socket.
//!
//! ## Blocking without a timeout
//!
//! Unlike a diagnostics poller, a batctl query blocks until the kernel
//! answers. The only bounded wait is `poll_readable()`, which the tp meter
//! uses so it can notice a cancellation request between polls.
//!
//! ## Unsafe Rust
//!
//! `socket()`, `bind()`, `setsockopt()`, `sendto()`, `recv()` and `poll()`
//! are FFI calls. Each one is wrapped in a safe method that checks the
//! return value and converts errno into a `SocketError`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Errors that can occur during Netlink socket operations
///
/// Wraps the `std::io::Error` of a failed syscall together with the name
/// of the syscall, so "bind() failed: Permission denied" reaches the user
/// instead of a bare "Permission denied".
#[derive(Debug)]
pub struct SocketError {
    message: String,
    kind: io::ErrorKind,
    errno: Option<i32>,
}

impl SocketError {
    fn new(message: String, kind: io::ErrorKind) -> Self {
        Self {
            message,
            kind,
            errno: None,
        }
    }

    fn from_io_error(context: &str, err: io::Error) -> Self {
        Self {
            message: format!("{}: {}", context, err),
            kind: err.kind(),
            errno: err.raw_os_error(),
        }
    }

    /// Error kind of the failed syscall
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// Raw errno of the failed syscall, if any
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        self.errno
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SocketError {}

/// Netlink protocol a socket talks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetlinkProtocol {
    /// Generic netlink (batadv family, controller)
    Generic,
    /// rtnetlink (link creation, master assignment)
    Route,
}

impl NetlinkProtocol {
    fn raw(self) -> libc::c_int {
        match self {
            NetlinkProtocol::Generic => libc::NETLINK_GENERIC,
            NetlinkProtocol::Route => libc::NETLINK_ROUTE,
        }
    }
}

/// Receive buffer handed to `recv()`; large enough for one dump datagram
pub const RECV_BUFFER_SIZE: usize = 65536;

/// Byte transport for netlink datagrams
///
/// Implemented by `NetlinkSocket`. Sessions, the dispatcher and the tp
/// meter are generic over it so they can be driven by scripted replies in
/// tests.
pub trait Transport {
    /// Send one complete request datagram
    fn send(&self, data: &[u8]) -> Result<(), SocketError>;

    /// Receive one datagram into `buffer`, blocking until one arrives
    fn recv(&self, buffer: &mut [u8]) -> Result<usize, SocketError>;

    /// Wait at most `timeout` for a datagram; `Ok(false)` on timeout
    fn poll_readable(&self, _timeout: Duration) -> Result<bool, SocketError> {
        Ok(true)
    }
}

/// Netlink socket wrapper with automatic cleanup
///
/// # Example
///
/// ```no_run
/// use batctl::netlink::socket::{NetlinkProtocol, NetlinkSocket};
///
/// let socket = NetlinkSocket::new(NetlinkProtocol::Generic)?;
/// socket.add_membership(4)?;
/// // Socket is automatically closed when it goes out of scope
/// # Ok::<(), batctl::netlink::socket::SocketError>(())
/// ```
///
/// # Safety
///
/// The raw file descriptor is never exposed publicly.
pub struct NetlinkSocket {
    fd: RawFd,
    protocol: NetlinkProtocol,
}

impl NetlinkSocket {
    /// Create and bind a new Netlink socket
    ///
    /// 1. Create AF_NETLINK socket for `protocol`
    /// 2. Bind with `nl_pid = 0` so the kernel assigns the port id
    /// 3. Enlarge the receive buffer for dump replies
    ///
    /// # Errors
    ///
    /// Returns `SocketError` if `socket()`, `bind()` or `setsockopt()` fails.
    pub fn new(protocol: NetlinkProtocol) -> Result<Self, SocketError> {
        unsafe {
            // === STEP 1: Create Netlink socket ===
            //
            // SAFETY: plain syscall, return value checked below.
            let fd = libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                protocol.raw(),
            );

            if fd < 0 {
                let err = io::Error::last_os_error();
                return Err(SocketError::from_io_error("socket() failed", err));
            }

            // === STEP 2: Bind socket ===
            //
            // SAFETY: zeroed() is a valid sockaddr_nl (all-integer POD).
            let mut addr: libc::sockaddr_nl = std::mem::zeroed();
            addr.nl_family = libc::AF_NETLINK as u16;
            addr.nl_pid = 0;
            addr.nl_groups = 0;

            let ret = libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as u32,
            );

            if ret < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(SocketError::from_io_error("bind() failed", err));
            }

            // === STEP 3: Receive buffer ===
            //
            // Dumps of large originator tables arrive in bursts; the
            // default buffer can overflow while we print.
            let rcvbuf: libc::c_int = 262_144;
            let ret = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &rcvbuf as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as u32,
            );

            if ret < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(SocketError::from_io_error(
                    "setsockopt(SO_RCVBUF) failed",
                    err,
                ));
            }

            tracing::trace!(fd, ?protocol, "netlink socket opened");
            Ok(Self { fd, protocol })
        }
    }

    /// Protocol this socket was opened for
    #[must_use]
    pub fn protocol(&self) -> NetlinkProtocol {
        self.protocol
    }

    /// Join a netlink multicast group
    ///
    /// # Errors
    ///
    /// Returns `SocketError` if `setsockopt(NETLINK_ADD_MEMBERSHIP)` fails.
    pub fn add_membership(&self, group: u32) -> Result<(), SocketError> {
        // SAFETY: valid fd, pointer/length describe a live u32.
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_NETLINK,
                libc::NETLINK_ADD_MEMBERSHIP,
                &group as *const _ as *const libc::c_void,
                std::mem::size_of::<u32>() as u32,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            return Err(SocketError::from_io_error(
                "setsockopt(NETLINK_ADD_MEMBERSHIP) failed",
                err,
            ));
        }

        tracing::debug!(fd = self.fd, group, "joined netlink multicast group");
        Ok(())
    }

    /// Send request bytes to the kernel
    ///
    /// # Errors
    ///
    /// Returns `SocketError` if `sendto()` fails or sends a short datagram.
    pub fn send(&self, data: &[u8]) -> Result<(), SocketError> {
        unsafe {
            // SAFETY: zeroed() is a valid sockaddr_nl; nl_pid 0 is the kernel.
            let mut addr: libc::sockaddr_nl = std::mem::zeroed();
            addr.nl_family = libc::AF_NETLINK as u16;

            // SAFETY: data.as_ptr() is valid for data.len() bytes.
            let ret = libc::sendto(
                self.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as u32,
            );

            if ret < 0 {
                let err = io::Error::last_os_error();
                return Err(SocketError::from_io_error("sendto() failed", err));
            }

            if ret as usize != data.len() {
                return Err(SocketError::new(
                    format!("Short send: sent {} of {} bytes", ret, data.len()),
                    io::ErrorKind::WriteZero,
                ));
            }

            Ok(())
        }
    }

    /// Receive one datagram into the provided buffer
    ///
    /// Blocks until the kernel sends something. Interrupted calls are
    /// restarted.
    ///
    /// # Errors
    ///
    /// Returns `SocketError` if `recv()` fails.
    pub fn recv(&self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        loop {
            // SAFETY: buffer.as_mut_ptr() is valid for buffer.len() bytes.
            let ret = unsafe {
                libc::recv(
                    self.fd,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                    0,
                )
            };

            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(SocketError::from_io_error("recv() failed", err));
            }

            return Ok(ret as usize);
        }
    }

    /// Wait until a datagram is readable or `timeout` elapses
    ///
    /// A signal interrupting the wait counts as a timeout so the caller
    /// gets a chance to look at its cancellation state.
    ///
    /// # Errors
    ///
    /// Returns `SocketError` if `poll()` fails for another reason.
    pub fn poll_readable(&self, timeout: Duration) -> Result<bool, SocketError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: one valid pollfd entry.
        let ret = unsafe { libc::poll(&mut pfd, 1, millis) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(SocketError::from_io_error("poll() failed", err));
        }

        Ok(ret > 0 && pfd.revents & libc::POLLIN != 0)
    }
}

impl Transport for NetlinkSocket {
    fn send(&self, data: &[u8]) -> Result<(), SocketError> {
        NetlinkSocket::send(self, data)
    }

    fn recv(&self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        NetlinkSocket::recv(self, buffer)
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool, SocketError> {
        NetlinkSocket::poll_readable(self, timeout)
    }
}

/// Automatic cleanup when socket is dropped
impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this struct and closed exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

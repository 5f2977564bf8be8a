//! Throughput meter coordinator
//!
//! The measurement itself runs inside the kernel module. This side starts
//! a test, learns the session cookie from the reply, then waits on the
//! `tpmeter` multicast group for the result carrying that cookie.
//!
//! # Educational Notes
//!
//! ## Two sockets
//!
//! ```text
//!  command socket ── TP_METER ──────────────▶ kernel
//!                 ◀─ reply {cookie} ────────
//!  listen socket  ◀─ multicast {cookie, result, time, bytes}
//!  command socket ── TP_METER_CANCEL ───────▶ (on SIGINT/SIGTERM)
//! ```
//!
//! The listener joins the group before the test is started so a fast
//! result cannot slip past.
//!
//! ## Cancellation
//!
//! The signal handler only flips a `CancelToken`. The wait loop polls the
//! listener with a short timeout, notices the token and sends the cancel
//! request itself. The kernel then answers with a `CANCEL` result that
//! still carries the partial counters.

use crate::bat_hosts::BatHosts;
use crate::netlink::batadv::{Attr, BATADV_NL_MCAST_GROUP_TPMETER, BATADV_NL_NAME, Command, TpReason};
use crate::netlink::dispatch::{Control, ErrorReporting, ResponseHandler, SessionError, receive};
use crate::netlink::genl::resolve_family;
use crate::netlink::message::GenlRequest;
use crate::netlink::policy::ParsedMessage;
use crate::netlink::session::{GenlSession, InterfaceResolver};
use crate::netlink::socket::{NetlinkProtocol, NetlinkSocket, Transport};
use crate::MacAddr;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long one listener poll may block before the cancel token is checked
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const USAGE: &str = "Usage: batctl tp [parameters] <MAC>\n\
Parameters:\n\
\t -t <time> test length in milliseconds\n\
\t -n don't convert addresses to bat-host names\n";

// ============================================================================
// ERRORS
// ============================================================================

/// Failures of a throughput test, carrying negative errno values
#[derive(Debug, thiserror::Error)]
pub enum TpError {
    #[error("Error - the tp meter destination is not a mac address or bat-host name: {0}")]
    BadDestination(String),

    #[error("Failed to connect to generic netlink: {0}")]
    Connect(i32),

    #[error("Failed to resolve batman-adv netlink: {0}")]
    ResolveFamily(i32),

    #[error("Failed to resolve batman-adv tpmeter multicast group: {0}")]
    ResolveGroup(i32),

    #[error("Failed to join batman-adv tpmeter multicast group: {0}")]
    JoinGroup(i32),

    #[error("Failed to send tp_meter request to kernel: {0}")]
    Start(i32),

    #[error("Failed to recv tp_meter result from kernel: {0}")]
    Receive(i32),

    #[error("failed to write result: {0}")]
    Output(#[from] io::Error),
}

fn negative(e: &SessionError) -> i32 {
    -e.errno()
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Flag set from the signal handler, read by the wait loop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token flipped by SIGINT and SIGTERM
    ///
    /// # Errors
    ///
    /// Fails when a handler is already installed.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let token = Self::new();
        let flag = token.clone();
        ctrlc::set_handler(move || flag.cancel())?;
        Ok(token)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Terminal notification of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpResult {
    pub reason: TpReason,
    pub test_time_ms: u32,
    pub total_bytes: u64,
}

impl TpResult {
    /// Bytes per second; `None` stands for an infinite rate (zero duration)
    #[must_use]
    pub fn throughput(&self) -> Option<u64> {
        if self.test_time_ms == 0 {
            return None;
        }
        Some(self.total_bytes.saturating_mul(1000) / u64::from(self.test_time_ms))
    }
}

/// Human readable rate with its bit rate in parentheses
#[must_use]
pub fn format_throughput(throughput: Option<u64>) -> String {
    let Some(rate) = throughput else {
        return "inf".to_string();
    };

    let value = rate as f32;
    if rate > 1 << 30 {
        format!(
            "{:.2} GB/s ({:2.0} Gbps)",
            value / (1u64 << 30) as f32,
            value * 8.0 / 1_000_000_000.0
        )
    } else if rate > 1 << 20 {
        format!(
            "{:.2} MB/s ({:.2} Mbps)",
            value / (1u64 << 20) as f32,
            value * 8.0 / 1_000_000.0
        )
    } else if rate > 1 << 10 {
        format!(
            "{:.2} KB/s ({:.2} Kbps)",
            value / (1u64 << 10) as f32,
            value * 8.0 / 1000.0
        )
    } else {
        format!("{rate} Bytes/s ({} Bps)", rate.wrapping_mul(8))
    }
}

/// Print the outcome of a test
///
/// Abort reasons go to `err`. Counters are only shown for `CANCEL` and
/// `COMPLETE`. Returns whether the test ran to a measurable end.
///
/// # Errors
///
/// Write failures.
pub fn print_result(
    result: &TpResult,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<bool> {
    match result.reason {
        TpReason::DstUnreachable => writeln!(err, "Destination unreachable")?,
        TpReason::ResendLimit => writeln!(
            err,
            "The number of retry for the same window exceeds the limit, test aborted"
        )?,
        TpReason::AlreadyOngoing => writeln!(err, "Cannot run two test towards the same node")?,
        TpReason::MemoryError => writeln!(err, "Kernel cannot allocate memory, aborted")?,
        TpReason::TooMany => writeln!(err, "Too many ongoing sessions")?,
        TpReason::Cancel | TpReason::Complete => {
            if result.reason == TpReason::Cancel {
                writeln!(out, "CANCEL received: test aborted")?;
            }
            writeln!(out, "Test duration {}ms.", result.test_time_ms)?;
            writeln!(out, "Sent {} Bytes.", result.total_bytes)?;
            writeln!(out, "Throughput: {}", format_throughput(result.throughput()))?;
            return Ok(true);
        }
        TpReason::CantSend | TpReason::Unrecognized(_) => {
            writeln!(out, "Unrecognized return value {}", result.reason.code())?;
        }
    }
    Ok(false)
}

// ============================================================================
// HANDLERS
// ============================================================================

const NO_COOKIE: &str = "tp meter reply without cookie";

/// Picks the session cookie out of the start reply
#[derive(Debug, Default)]
struct CookieHandler {
    cookie: Option<u32>,
}

impl ResponseHandler for CookieHandler {
    fn command(&self) -> Command {
        Command::TpMeter
    }

    fn mandatory(&self) -> &[Attr] {
        &[]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        let cookie = message
            .u32(Attr::TpmeterCookie)
            .ok_or(SessionError::InvalidEncoding(NO_COOKIE))?;
        self.cookie = Some(cookie);
        Ok(Control::Continue)
    }
}

/// Waits for the multicast result matching `cookie`
#[derive(Debug)]
struct ResultHandler {
    cookie: u32,
    result: Option<TpResult>,
}

impl ResponseHandler for ResultHandler {
    fn command(&self) -> Command {
        Command::TpMeter
    }

    fn mandatory(&self) -> &[Attr] {
        &[]
    }

    fn handle(&mut self, message: &ParsedMessage) -> Result<Control, SessionError> {
        let cookie = message
            .u32(Attr::TpmeterCookie)
            .ok_or(SessionError::InvalidEncoding("tp meter result without cookie"))?;

        let Some(reason) = message.u8(Attr::TpmeterResult) else {
            return Ok(Control::Continue);
        };

        if cookie != self.cookie {
            tracing::trace!(cookie, expected = self.cookie, "result of another tp session");
            return Ok(Control::Continue);
        }

        self.result = Some(TpResult {
            reason: TpReason::from(reason),
            test_time_ms: message.u32(Attr::TpmeterTestTime).unwrap_or(0),
            total_bytes: message.u64(Attr::TpmeterBytes).unwrap_or(0),
        });
        Ok(Control::Stop)
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Open a socket subscribed to the `tpmeter` multicast group
///
/// # Errors
///
/// One variant per setup step, each carrying the negative errno.
pub fn open_listener() -> Result<NetlinkSocket, TpError> {
    let socket = NetlinkSocket::new(NetlinkProtocol::Generic)
        .map_err(|e| TpError::Connect(-e.errno().unwrap_or(libc::EIO)))?;

    let family = resolve_family(&socket, BATADV_NL_NAME)
        .map_err(|e| TpError::ResolveFamily(negative(&e)))?;

    let group = family
        .group(BATADV_NL_MCAST_GROUP_TPMETER)
        .ok_or(TpError::ResolveGroup(-libc::ENOENT))?;

    socket
        .add_membership(group)
        .map_err(|e| TpError::JoinGroup(-e.errno().unwrap_or(libc::EIO)))?;

    Ok(socket)
}

/// One throughput test towards `destination`
pub struct TpSession<T: Transport> {
    session: GenlSession<T>,
    mesh_ifindex: u32,
    destination: MacAddr,
}

impl<T: Transport> TpSession<T> {
    pub fn new(session: GenlSession<T>, mesh_ifindex: u32, destination: MacAddr) -> Self {
        Self {
            session,
            mesh_ifindex,
            destination,
        }
    }

    /// Ask the kernel to start the test, returning its cookie
    ///
    /// A `test_time_ms` of 0 leaves the duration to the kernel default.
    ///
    /// # Errors
    ///
    /// `InvalidEncoding` when the reply carried no cookie, plus session errors.
    pub fn start(&mut self, test_time_ms: u32) -> Result<u32, SessionError> {
        let mut handler = CookieHandler::default();
        let request = GenlRequest::new(Command::TpMeter, self.mesh_ifindex)
            .with_orig_address(self.destination)
            .with_test_time(test_time_ms);

        self.session
            .request(&request, &mut handler, ErrorReporting::Print)?;

        let cookie = handler.cookie.ok_or(SessionError::InvalidEncoding(NO_COOKIE))?;
        tracing::debug!(cookie, destination = %self.destination, "tp meter started");
        Ok(cookie)
    }

    /// Best effort stop request; no reply is awaited
    ///
    /// # Errors
    ///
    /// `Socket` when the request cannot be sent.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        let request = GenlRequest::new(Command::TpMeterCancel, self.mesh_ifindex)
            .with_orig_address(self.destination);
        self.session.send(&request)
    }

    /// Block until the result for `cookie` arrives on `listener`
    ///
    /// A set `token` triggers one cancel request; the loop then keeps
    /// waiting for the kernel's `CANCEL` result.
    ///
    /// # Errors
    ///
    /// Receive failures and undecodable notifications.
    pub fn wait<L: Transport + ?Sized>(
        &mut self,
        listener: &L,
        cookie: u32,
        token: &CancelToken,
    ) -> Result<TpResult, SessionError> {
        let mut handler = ResultHandler {
            cookie,
            result: None,
        };
        let mut cancel_sent = false;

        loop {
            if token.is_cancelled() && !cancel_sent {
                cancel_sent = true;
                if let Err(e) = self.cancel() {
                    tracing::warn!(error = %e, "failed to send tp meter cancel request");
                }
            }

            if !listener.poll_readable(POLL_INTERVAL)? {
                continue;
            }

            receive(listener, &mut handler, ErrorReporting::Silent)?;
            if let Some(result) = handler.result {
                tracing::debug!(cookie, reason = result.reason.code(), "tp meter finished");
                return Ok(result);
            }
        }
    }
}

/// Parameters of `batctl tp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpRequest {
    pub mesh_iface: String,
    pub destination: String,
    pub test_time_ms: u32,
}

/// Run a complete test and print its outcome
///
/// Returns whether the test completed or was cancelled with a result.
///
/// # Errors
///
/// `TpError` naming the failed step.
pub fn run<R: InterfaceResolver + ?Sized>(
    request: &TpRequest,
    hosts: &BatHosts,
    resolver: &R,
    token: &CancelToken,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<bool, TpError> {
    let destination = hosts
        .resolve(&request.destination)
        .ok_or_else(|| TpError::BadDestination(request.destination.clone()))?;

    let listener = open_listener()?;

    let session = GenlSession::open().map_err(|e| TpError::Start(negative(&e)))?;
    let Some(mesh_ifindex) = resolver.index_of(&request.mesh_iface) else {
        writeln!(err, "Interface {} is unknown", request.mesh_iface)?;
        return Err(TpError::Start(-libc::ENODEV));
    };

    let mut test = TpSession::new(session, mesh_ifindex, destination);
    let cookie = test
        .start(request.test_time_ms)
        .map_err(|e| TpError::Start(negative(&e)))?;

    out.flush()?;
    let result = test
        .wait(&listener, cookie, token)
        .map_err(|e| TpError::Receive(negative(&e)))?;

    Ok(print_result(&result, out, err)?)
}

//! rtnetlink link management
//!
//! The mesh interface is an ordinary kernel link of kind `batadv`; hard
//! interfaces join it by getting their `IFLA_MASTER` pointed at it. All of
//! that goes through `RTM_*LINK` messages on a `NETLINK_ROUTE` socket.
//!
//! # Educational Notes
//!
//! ## Message layout
//!
//! ```text
//! ┌──────────────┬─────────────────────┬──────────────────────┐
//! │ NlMsgHdr     │ IfInfoMsg (16 bytes)│ IFLA_* attributes    │
//! └──────────────┴─────────────────────┴──────────────────────┘
//! ```
//!
//! Requests that change state set `NLM_F_ACK`; the kernel answers with an
//! `NLMSG_ERROR` carrying errno 0 on success.
//!
//! ## Master filter
//!
//! A link dump carrying `IFLA_MASTER` is filtered by newer kernels. Older
//! ones ignore the attribute and return every link, so the master is
//! checked again on every reply.

use crate::netlink::message::{MessageBuilder, NetlinkMessage, attribute_list, parse_netlink_messages};
use crate::netlink::socket::{NetlinkProtocol, NetlinkSocket, RECV_BUFFER_SIZE, SocketError, Transport};
use crate::netlink::structures::*;
use crate::strerror;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RtnlError {
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("malformed rtnetlink reply: {0}")]
    Message(String),

    #[error("{}", strerror(.0.abs()))]
    Kernel(i32),
}

impl RtnlError {
    /// Positive errno for the error, as the kernel would report it
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            RtnlError::Socket(e) => e.errno().unwrap_or(libc::EIO),
            RtnlError::Message(_) => libc::EINVAL,
            RtnlError::Kernel(errno) => *errno,
        }
    }
}

impl From<crate::netlink::message::MessageError> for RtnlError {
    fn from(e: crate::netlink::message::MessageError) -> Self {
        RtnlError::Message(e.to_string())
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// One link of a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: u32,
    pub name: String,
    pub master: Option<u32>,
}

/// Parent link and id of a VLAN interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanLink {
    pub parent_index: u32,
    pub vid: u16,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Route netlink socket plus request sequence
pub struct RtnlHandle<T: Transport> {
    transport: T,
    seq: u32,
}

impl RtnlHandle<NetlinkSocket> {
    /// # Errors
    ///
    /// `Socket` when the route socket cannot be opened.
    pub fn open() -> Result<Self, RtnlError> {
        let socket = NetlinkSocket::new(NetlinkProtocol::Route)?;
        Ok(Self::with_transport(socket))
    }
}

impl<T: Transport> RtnlHandle<T> {
    #[must_use]
    pub fn with_transport(transport: T) -> Self {
        Self { transport, seq: 0 }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn builder(&mut self, msg_type: u16, flags: u16) -> MessageBuilder {
        self.seq = self.seq.wrapping_add(1);
        let mut builder = MessageBuilder::new(msg_type, flags, self.seq);
        builder.put_struct(&IfInfoMsg {
            ifi_family: libc::AF_UNSPEC as u8,
            ..IfInfoMsg::default()
        });
        builder
    }

    /// Links whose master is `master`
    ///
    /// # Errors
    ///
    /// Socket, parse or kernel errors of the dump.
    pub fn links_with_master(&mut self, master: u32) -> Result<Vec<LinkInfo>, RtnlError> {
        let mut builder = self.builder(RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP);
        builder.put_u32(IFLA_MASTER, master);
        self.transport.send(&builder.finish())?;

        let links = self.collect_links()?;
        tracing::debug!(master, total = links.len(), "link dump received");

        Ok(links
            .into_iter()
            .filter(|link| link.master == Some(master))
            .collect())
    }

    /// Create the mesh interface `name`
    ///
    /// # Errors
    ///
    /// `Kernel(EEXIST)` when a link of that name exists, plus the usual
    /// socket errors.
    pub fn create_mesh(&mut self, name: &str) -> Result<(), RtnlError> {
        let mut builder = self.builder(
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK,
        );
        builder.put_string(IFLA_IFNAME, name);
        let linkinfo = builder.begin_nested(IFLA_LINKINFO);
        builder.put_string(IFLA_INFO_KIND, "batadv");
        builder.end_nested(linkinfo);

        tracing::debug!(mesh = name, "creating mesh interface");
        self.acked(builder)
    }

    /// Delete the link `name`
    ///
    /// # Errors
    ///
    /// `Kernel(ENODEV)` for unknown links, plus socket errors.
    pub fn destroy_mesh(&mut self, name: &str) -> Result<(), RtnlError> {
        let mut builder = self.builder(RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK);
        builder.put_string(IFLA_IFNAME, name);

        tracing::debug!(mesh = name, "destroying mesh interface");
        self.acked(builder)
    }

    /// Point the master of `iface` at `master`; 0 releases it
    ///
    /// # Errors
    ///
    /// Kernel or socket errors.
    pub fn set_master(&mut self, iface: &str, master: u32) -> Result<(), RtnlError> {
        let mut builder = self.builder(RTM_SETLINK, NLM_F_REQUEST | NLM_F_ACK);
        builder.put_string(IFLA_IFNAME, iface);
        builder.put_u32(IFLA_MASTER, master);

        tracing::debug!(iface, master, "setting link master");
        self.acked(builder)
    }

    /// Parent and VLAN id when `iface` is a VLAN link, `None` otherwise
    ///
    /// # Errors
    ///
    /// Kernel or socket errors of the lookup, `ENODEV` included.
    pub fn vlan_link(&mut self, iface: &str) -> Result<Option<VlanLink>, RtnlError> {
        let mut builder = self.builder(RTM_GETLINK, NLM_F_REQUEST);
        builder.put_string(IFLA_IFNAME, iface);
        self.transport.send(&builder.finish())?;

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let len = self.transport.recv(&mut buffer)?;

        for message in parse_netlink_messages(&buffer[..len])? {
            match message {
                NetlinkMessage::Data { header, payload } if header.nlmsg_type == RTM_NEWLINK => {
                    return parse_vlan(&payload);
                }
                NetlinkMessage::Error(0) | NetlinkMessage::Done(0) => return Ok(None),
                NetlinkMessage::Error(errno) | NetlinkMessage::Done(errno) => {
                    return Err(RtnlError::Kernel(errno));
                }
                _ => {}
            }
        }

        Ok(None)
    }

    fn acked(&mut self, builder: MessageBuilder) -> Result<(), RtnlError> {
        self.transport.send(&builder.finish())?;

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let len = self.transport.recv(&mut buffer)?;
            if len == 0 {
                return Ok(());
            }

            for message in parse_netlink_messages(&buffer[..len])? {
                match message {
                    NetlinkMessage::Error(0) => return Ok(()),
                    NetlinkMessage::Error(errno) => return Err(RtnlError::Kernel(errno)),
                    NetlinkMessage::Overrun => return Err(RtnlError::Kernel(libc::ENOBUFS)),
                    _ => {}
                }
            }
        }
    }

    fn collect_links(&mut self) -> Result<Vec<LinkInfo>, RtnlError> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let mut links = Vec::new();

        loop {
            let len = self.transport.recv(&mut buffer)?;
            if len == 0 {
                return Ok(links);
            }

            let mut multipart = false;
            for message in parse_netlink_messages(&buffer[..len])? {
                match message {
                    NetlinkMessage::Data { header, payload } => {
                        multipart |= header.nlmsg_flags & NLM_F_MULTI != 0;
                        if header.nlmsg_type != RTM_NEWLINK {
                            continue;
                        }
                        if let Some(link) = parse_link(&payload)? {
                            links.push(link);
                        }
                    }
                    NetlinkMessage::Done(0) | NetlinkMessage::Error(0) => return Ok(links),
                    NetlinkMessage::Done(errno) | NetlinkMessage::Error(errno) => {
                        return Err(RtnlError::Kernel(errno));
                    }
                    NetlinkMessage::Overrun => return Err(RtnlError::Kernel(libc::ENOBUFS)),
                }
            }

            if !multipart {
                return Ok(links);
            }
        }
    }
}

// ============================================================================
// REPLY PARSING
// ============================================================================

const IFINFO_LEN: usize = nlmsg_align(std::mem::size_of::<IfInfoMsg>());

/// Decode an `RTM_NEWLINK` payload; links without a name are skipped
fn parse_link(payload: &[u8]) -> Result<Option<LinkInfo>, RtnlError> {
    let Some(ifinfo) = read_struct::<IfInfoMsg>(payload) else {
        return Err(RtnlError::Message("ifinfomsg truncated".to_string()));
    };

    let mut name = None;
    let mut master = None;
    for (attr_type, data) in attribute_list(payload.get(IFINFO_LEN..).unwrap_or_default())? {
        match attr_type {
            IFLA_IFNAME => name = c_string(data),
            IFLA_MASTER => master = u32_attr(data),
            _ => {}
        }
    }

    Ok(name.map(|name| LinkInfo {
        index: ifinfo.ifi_index as u32,
        name,
        master,
    }))
}

fn parse_vlan(payload: &[u8]) -> Result<Option<VlanLink>, RtnlError> {
    let attrs = attribute_list(payload.get(IFINFO_LEN..).unwrap_or_default())?;

    let parent_index = attrs
        .iter()
        .find(|(attr_type, _)| *attr_type == IFLA_LINK)
        .and_then(|(_, data)| u32_attr(data));
    let Some(linkinfo) = attrs
        .iter()
        .find(|(attr_type, _)| *attr_type == IFLA_LINKINFO)
        .map(|(_, data)| *data)
    else {
        return Ok(None);
    };

    let info = attribute_list(linkinfo)?;
    let is_vlan = info
        .iter()
        .any(|(attr_type, data)| *attr_type == IFLA_INFO_KIND && c_string(data).as_deref() == Some("vlan"));
    if !is_vlan {
        return Ok(None);
    }

    let vid = match info.iter().find(|(attr_type, _)| *attr_type == IFLA_INFO_DATA) {
        Some((_, data)) => attribute_list(data)?
            .into_iter()
            .find(|(attr_type, _)| *attr_type == IFLA_VLAN_ID)
            .and_then(|(_, data)| Some(u16::from_ne_bytes(data.get(0..2)?.try_into().ok()?))),
        None => None,
    };

    Ok(parent_index
        .zip(vid)
        .map(|(parent_index, vid)| VlanLink { parent_index, vid }))
}

fn c_string(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    std::str::from_utf8(&data[..end]).ok().map(str::to_string)
}

fn u32_attr(data: &[u8]) -> Option<u32> {
    Some(u32::from_ne_bytes(data.get(0..4)?.try_into().ok()?))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        sent: RefCell<Vec<Vec<u8>>>,
        replies: RefCell<VecDeque<Vec<u8>>>,
    }

    impl Scripted {
        fn replying(replies: Vec<Vec<u8>>) -> Self {
            Self {
                sent: RefCell::default(),
                replies: RefCell::new(replies.into()),
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

    fn ack(errno: i32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NLMSG_ERROR, 0, 1);
        builder.put_struct(&(-errno));
        builder.finish()
    }

    fn link(index: i32, name: &str, master: Option<u32>) -> Vec<u8> {
        let mut builder = MessageBuilder::new(RTM_NEWLINK, NLM_F_MULTI, 1);
        builder.put_struct(&IfInfoMsg {
            ifi_index: index,
            ..IfInfoMsg::default()
        });
        builder.put_string(IFLA_IFNAME, name);
        if let Some(master) = master {
            builder.put_u32(IFLA_MASTER, master);
        }
        builder.finish()
    }

    fn done() -> Vec<u8> {
        let mut builder = MessageBuilder::new(NLMSG_DONE, NLM_F_MULTI, 1);
        builder.put_struct(&0i32);
        builder.finish()
    }

    fn has_attr(message: &[u8], wanted: u16) -> bool {
        attribute_list(&message[NLMSG_HDRLEN + IFINFO_LEN..])
            .unwrap()
            .iter()
            .any(|(attr_type, _)| *attr_type == wanted)
    }

    #[test]
    fn test_links_filtered_by_master() {
        let mut datagram = link(3, "eth0", Some(7));
        datagram.extend(link(4, "eth1", Some(9)));
        datagram.extend(link(5, "wlan0", None));
        let transport = Scripted::replying(vec![datagram, done()]);

        let mut rtnl = RtnlHandle::with_transport(transport);
        let links = rtnl.links_with_master(7).unwrap();

        assert_eq!(
            links,
            vec![LinkInfo {
                index: 3,
                name: "eth0".to_string(),
                master: Some(7)
            }]
        );

        let sent = rtnl.transport().sent.borrow();
        let header = read_struct::<NlMsgHdr>(&sent[0]).unwrap();
        assert_eq!(header.nlmsg_type, RTM_GETLINK);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert!(has_attr(&sent[0], IFLA_MASTER));
    }

    #[test]
    fn test_create_mesh_sends_linkinfo() {
        let mut rtnl = RtnlHandle::with_transport(Scripted::replying(vec![ack(0)]));
        rtnl.create_mesh("bat0").unwrap();

        let sent = rtnl.transport().sent.borrow();
        let header = read_struct::<NlMsgHdr>(&sent[0]).unwrap();
        assert_eq!(header.nlmsg_type, RTM_NEWLINK);
        assert_ne!(header.nlmsg_flags & NLM_F_ACK, 0);
        assert_ne!(header.nlmsg_flags & NLM_F_EXCL, 0);
        assert!(has_attr(&sent[0], IFLA_IFNAME));
        assert!(has_attr(&sent[0], IFLA_LINKINFO));
    }

    #[test]
    fn test_kernel_refusal_is_reported() {
        let mut rtnl = RtnlHandle::with_transport(Scripted::replying(vec![ack(libc::EEXIST)]));
        let err = rtnl.create_mesh("bat0").unwrap_err();
        assert!(matches!(err, RtnlError::Kernel(libc::EEXIST)));
        assert_eq!(err.errno(), libc::EEXIST);
    }

    #[test]
    fn test_release_master() {
        let mut rtnl = RtnlHandle::with_transport(Scripted::replying(vec![ack(0)]));
        rtnl.set_master("eth0", 0).unwrap();

        let sent = rtnl.transport().sent.borrow();
        let header = read_struct::<NlMsgHdr>(&sent[0]).unwrap();
        assert_eq!(header.nlmsg_type, RTM_SETLINK);
        assert!(has_attr(&sent[0], IFLA_MASTER));
    }

    #[test]
    fn test_vlan_link_lookup() {
        let mut builder = MessageBuilder::new(RTM_NEWLINK, 0, 1);
        builder.put_struct(&IfInfoMsg {
            ifi_index: 12,
            ..IfInfoMsg::default()
        });
        builder.put_string(IFLA_IFNAME, "bat0.5");
        builder.put_u32(IFLA_LINK, 7);
        let linkinfo = builder.begin_nested(IFLA_LINKINFO);
        builder.put_string(IFLA_INFO_KIND, "vlan");
        let data = builder.begin_nested(IFLA_INFO_DATA);
        builder.put_u16(IFLA_VLAN_ID, 5);
        builder.end_nested(data);
        builder.end_nested(linkinfo);

        let mut rtnl = RtnlHandle::with_transport(Scripted::replying(vec![builder.finish()]));
        assert_eq!(
            rtnl.vlan_link("bat0.5").unwrap(),
            Some(VlanLink {
                parent_index: 7,
                vid: 5
            })
        );
    }

    #[test]
    fn test_plain_link_is_not_vlan() {
        let mut rtnl = RtnlHandle::with_transport(Scripted::replying(vec![link(7, "bat0", None)]));
        assert_eq!(rtnl.vlan_link("bat0").unwrap(), None);
    }
}

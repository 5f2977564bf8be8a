//! Generic netlink family resolution
//!
//! Generic netlink families get their numeric id at module load time. The
//! controller family (fixed id `GENL_ID_CTRL`) maps the name to that id and
//! lists the family's multicast groups.

use crate::netlink::dispatch::SessionError;
use crate::netlink::message::{
    MessageBuilder, NetlinkMessage, attribute_list, parse_attributes, parse_netlink_messages,
};
use crate::netlink::socket::{RECV_BUFFER_SIZE, Transport};
use crate::netlink::structures::*;
use std::collections::HashMap;

/// Resolved family id and its multicast groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyInfo {
    pub id: u16,
    pub mcast_groups: HashMap<String, u32>,
}

impl FamilyInfo {
    /// Id of the named multicast group
    #[must_use]
    pub fn group(&self, name: &str) -> Option<u32> {
        self.mcast_groups.get(name).copied()
    }
}

/// Ask the controller for the family `name`
///
/// # Errors
///
/// * `ProtocolUnsupported` when the controller does not know the family
/// * `Kernel` for any other controller error
/// * `MalformedResponse` when the reply lacks the family id
pub fn resolve_family<T: Transport + ?Sized>(
    transport: &T,
    name: &str,
) -> Result<FamilyInfo, SessionError> {
    let mut builder = MessageBuilder::new(GENL_ID_CTRL, NLM_F_REQUEST, 0);
    builder.put_genl_header(CTRL_CMD_GETFAMILY, 1);
    builder.put_string(CTRL_ATTR_FAMILY_NAME, name);
    transport.send(&builder.finish())?;

    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let len = transport.recv(&mut buffer)?;
        if len == 0 {
            return Err(SessionError::ProtocolUnsupported(name.to_string()));
        }

        for message in parse_netlink_messages(&buffer[..len])? {
            match message {
                NetlinkMessage::Data { header, payload } if header.nlmsg_type == GENL_ID_CTRL => {
                    let info = parse_family(&payload)?;
                    tracing::debug!(
                        family = name,
                        id = info.id,
                        groups = info.mcast_groups.len(),
                        "resolved generic netlink family"
                    );
                    return Ok(info);
                }
                NetlinkMessage::Data { .. } | NetlinkMessage::Overrun => {}
                NetlinkMessage::Error(libc::ENOENT) => {
                    return Err(SessionError::ProtocolUnsupported(name.to_string()));
                }
                NetlinkMessage::Error(errno) | NetlinkMessage::Done(errno) if errno != 0 => {
                    return Err(SessionError::Kernel(errno));
                }
                NetlinkMessage::Error(_) | NetlinkMessage::Done(_) => {
                    return Err(SessionError::ProtocolUnsupported(name.to_string()));
                }
            }
        }
    }
}

/// Decode a `CTRL_CMD_NEWFAMILY` payload
fn parse_family(payload: &[u8]) -> Result<FamilyInfo, SessionError> {
    if payload.len() < GENL_HDRLEN {
        return Err(SessionError::MalformedResponse(
            "controller reply truncated".to_string(),
        ));
    }

    let attrs = parse_attributes(&payload[GENL_HDRLEN..])?;

    let id = attrs
        .get(&CTRL_ATTR_FAMILY_ID)
        .and_then(|raw| raw.get(0..2))
        .map(|raw| u16::from_ne_bytes([raw[0], raw[1]]))
        .ok_or_else(|| {
            SessionError::MalformedResponse("controller reply without family id".to_string())
        })?;

    let mut mcast_groups = HashMap::new();
    if let Some(groups) = attrs.get(&CTRL_ATTR_MCAST_GROUPS) {
        // Each entry is itself a nest indexed 1..n
        for (_, group) in attribute_list(groups)? {
            let fields = parse_attributes(group)?;
            let name = fields
                .get(&CTRL_ATTR_MCAST_GRP_NAME)
                .map(|raw| cstr(raw));
            let grp_id = fields
                .get(&CTRL_ATTR_MCAST_GRP_ID)
                .and_then(|raw| raw.get(0..4))
                .map(|raw| u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]));

            if let (Some(name), Some(grp_id)) = (name, grp_id) {
                mcast_groups.insert(name, grp_id);
            }
        }
    }

    Ok(FamilyInfo { id, mcast_groups })
}

fn cstr(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

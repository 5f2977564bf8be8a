//! Attribute codec for the batadv family
//!
//! Every attribute the kernel can send is described once by an
//! `AttributeSpec`. Inbound blobs are validated and decoded against that
//! table before any handler sees them, so a value present in a
//! `ParsedMessage` always satisfies its spec. Absence stays distinct from
//! a zero value.

use crate::MacAddr;
use crate::netlink::batadv::{Attr, BATADV_ATTR_MAX};
use crate::netlink::structures::{ETH_ALEN, IFNAMSIZ};
use std::collections::HashMap;

/// Wire representation of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    U8,
    U16,
    U32,
    U64,
    /// NUL-terminated UTF-8
    String,
    /// Opaque blob of exactly this many bytes
    FixedBytes(usize),
    /// Presence-only, zero-length payload
    Flag,
    /// No constraints (padding)
    Unspec,
}

/// Validation rule for one attribute id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub id: Attr,
    pub wire_type: WireType,
    pub min_len: usize,
    pub max_len: Option<usize>,
}

impl AttributeSpec {
    const fn new(id: Attr, wire_type: WireType) -> Self {
        let (min_len, max_len) = match wire_type {
            WireType::U8 => (1, Some(1)),
            WireType::U16 => (2, Some(2)),
            WireType::U32 => (4, Some(4)),
            WireType::U64 => (8, Some(8)),
            WireType::String => (1, None),
            WireType::FixedBytes(len) => (len, Some(len)),
            WireType::Flag => (0, Some(0)),
            WireType::Unspec => (0, None),
        };
        Self {
            id,
            wire_type,
            min_len,
            max_len,
        }
    }

    /// String limited to `max_len` bytes including the terminator
    const fn bounded_string(id: Attr, max_len: usize) -> Self {
        Self {
            id,
            wire_type: WireType::String,
            min_len: 1,
            max_len: Some(max_len),
        }
    }
}

/// The batadv attribute policy, indexed by `id - 1`
pub static BATADV_POLICY: [AttributeSpec; BATADV_ATTR_MAX as usize] = [
    AttributeSpec::new(Attr::Version, WireType::String),
    AttributeSpec::new(Attr::AlgoName, WireType::String),
    AttributeSpec::new(Attr::MeshIfindex, WireType::U32),
    AttributeSpec::bounded_string(Attr::MeshIfname, IFNAMSIZ),
    AttributeSpec::new(Attr::MeshAddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::HardIfindex, WireType::U32),
    AttributeSpec::bounded_string(Attr::HardIfname, IFNAMSIZ),
    AttributeSpec::new(Attr::HardAddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::OrigAddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::TpmeterResult, WireType::U8),
    AttributeSpec::new(Attr::TpmeterTestTime, WireType::U32),
    AttributeSpec::new(Attr::TpmeterBytes, WireType::U64),
    AttributeSpec::new(Attr::TpmeterCookie, WireType::U32),
    AttributeSpec::new(Attr::Pad, WireType::Unspec),
    AttributeSpec::new(Attr::Active, WireType::Flag),
    AttributeSpec::new(Attr::TtAddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::TtTtvn, WireType::U8),
    AttributeSpec::new(Attr::TtLastTtvn, WireType::U8),
    AttributeSpec::new(Attr::TtCrc32, WireType::U32),
    AttributeSpec::new(Attr::TtVid, WireType::U16),
    AttributeSpec::new(Attr::TtFlags, WireType::U32),
    AttributeSpec::new(Attr::FlagBest, WireType::Flag),
    AttributeSpec::new(Attr::LastSeenMsecs, WireType::U32),
    AttributeSpec::new(Attr::NeighAddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::Tq, WireType::U8),
    AttributeSpec::new(Attr::Throughput, WireType::U32),
    AttributeSpec::new(Attr::BandwidthUp, WireType::U32),
    AttributeSpec::new(Attr::BandwidthDown, WireType::U32),
    AttributeSpec::new(Attr::Router, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::BlaOwn, WireType::Flag),
    AttributeSpec::new(Attr::BlaAddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::BlaVid, WireType::U16),
    AttributeSpec::new(Attr::BlaBackbone, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::BlaCrc, WireType::U16),
    AttributeSpec::new(Attr::DatCacheIp4address, WireType::U32),
    AttributeSpec::new(Attr::DatCacheHwaddress, WireType::FixedBytes(ETH_ALEN)),
    AttributeSpec::new(Attr::DatCacheVid, WireType::U16),
    AttributeSpec::new(Attr::McastFlags, WireType::U32),
    AttributeSpec::new(Attr::McastFlagsPriv, WireType::U32),
];

/// Look up the spec for an attribute
#[must_use]
pub fn spec_for(attr: Attr) -> &'static AttributeSpec {
    &BATADV_POLICY[usize::from(attr.id() - 1)]
}

/// Decoded attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    String(String),
    Bytes(Vec<u8>),
    Flag,
}

/// Codec failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("attribute {attr}: length {len} outside [{min}, {max}]")]
    LengthMismatch {
        attr: Attr,
        len: usize,
        min: usize,
        max: String,
    },

    #[error("attribute {attr}: {reason}")]
    InvalidEncoding { attr: Attr, reason: &'static str },

    #[error("mandatory attribute {0} missing")]
    MissingAttribute(Attr),
}

/// Validate `raw` against `spec` and decode it
///
/// # Errors
///
/// `LengthMismatch` when the blob length is outside `[min_len, max_len]`,
/// `InvalidEncoding` for strings that are not NUL-terminated UTF-8.
pub fn decode(raw: &[u8], spec: &AttributeSpec) -> Result<AttrValue, DecodeError> {
    let too_long = spec.max_len.is_some_and(|max| raw.len() > max);
    if raw.len() < spec.min_len || too_long {
        return Err(DecodeError::LengthMismatch {
            attr: spec.id,
            len: raw.len(),
            min: spec.min_len,
            max: spec
                .max_len
                .map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        });
    }

    let value = match spec.wire_type {
        WireType::U8 => AttrValue::U8(raw[0]),
        WireType::U16 => AttrValue::U16(u16::from_ne_bytes([raw[0], raw[1]])),
        WireType::U32 => AttrValue::U32(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]])),
        WireType::U64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw[..8]);
            AttrValue::U64(u64::from_ne_bytes(bytes))
        }
        WireType::String => {
            let Some((&0, text)) = raw.split_last() else {
                return Err(DecodeError::InvalidEncoding {
                    attr: spec.id,
                    reason: "string is not NUL-terminated",
                });
            };
            // Kernel strings may carry padding NULs before the terminator.
            let text = text.split(|&b| b == 0).next().unwrap_or_default();
            let text = std::str::from_utf8(text).map_err(|_| DecodeError::InvalidEncoding {
                attr: spec.id,
                reason: "string is not valid UTF-8",
            })?;
            AttrValue::String(text.to_string())
        }
        WireType::FixedBytes(_) | WireType::Unspec => AttrValue::Bytes(raw.to_vec()),
        WireType::Flag => AttrValue::Flag,
    };

    Ok(value)
}

/// Attribute map of one received message
///
/// Built fresh per message and discarded after the handler ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    cmd: u8,
    attrs: HashMap<Attr, AttrValue>,
}

impl ParsedMessage {
    /// Decode every known attribute in `raw`; unknown ids are skipped
    ///
    /// # Errors
    ///
    /// The first `DecodeError` of any attribute.
    pub fn from_raw(cmd: u8, raw: &HashMap<u16, Vec<u8>>) -> Result<Self, DecodeError> {
        let mut attrs = HashMap::with_capacity(raw.len());
        for (&id, blob) in raw {
            let Some(attr) = Attr::from_id(id) else {
                tracing::trace!(id, "skipping unknown attribute");
                continue;
            };
            attrs.insert(attr, decode(blob, spec_for(attr))?);
        }
        Ok(Self { cmd, attrs })
    }

    /// Command code of the message
    #[must_use]
    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Build a message from already decoded values (tests, synthetic replies)
    #[must_use]
    pub fn with_values(cmd: u8, values: impl IntoIterator<Item = (Attr, AttrValue)>) -> Self {
        Self {
            cmd,
            attrs: values.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, attr: Attr) -> bool {
        self.attrs.contains_key(&attr)
    }

    #[must_use]
    pub fn get(&self, attr: Attr) -> Option<&AttrValue> {
        self.attrs.get(&attr)
    }

    #[must_use]
    pub fn u8(&self, attr: Attr) -> Option<u8> {
        match self.attrs.get(&attr)? {
            AttrValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn u16(&self, attr: Attr) -> Option<u16> {
        match self.attrs.get(&attr)? {
            AttrValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn u32(&self, attr: Attr) -> Option<u32> {
        match self.attrs.get(&attr)? {
            AttrValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn u64(&self, attr: Attr) -> Option<u64> {
        match self.attrs.get(&attr)? {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn string(&self, attr: Attr) -> Option<&str> {
        match self.attrs.get(&attr)? {
            AttrValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes(&self, attr: Attr) -> Option<&[u8]> {
        match self.attrs.get(&attr)? {
            AttrValue::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn mac(&self, attr: Attr) -> Option<MacAddr> {
        MacAddr::from_slice(self.bytes(attr)?)
    }

    /// Flag attributes are true when present
    #[must_use]
    pub fn flag(&self, attr: Attr) -> bool {
        matches!(self.attrs.get(&attr), Some(AttrValue::Flag))
    }

    /// Check that every id in `required` is present
    ///
    /// # Errors
    ///
    /// `MissingAttribute` naming the first absent id.
    pub fn validate_mandatory(&self, required: &[Attr]) -> Result<(), DecodeError> {
        validate_mandatory(self, required)
    }
}

/// Check that every id in `required` is present in `message`
///
/// # Errors
///
/// `MissingAttribute` naming the first absent id.
pub fn validate_mandatory(message: &ParsedMessage, required: &[Attr]) -> Result<(), DecodeError> {
    match required.iter().find(|attr| !message.contains(**attr)) {
        Some(attr) => Err(DecodeError::MissingAttribute(*attr)),
        None => Ok(()),
    }
}

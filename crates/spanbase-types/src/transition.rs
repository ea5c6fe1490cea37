//! Region transition records: the payloads written to coordination nodes
//! while a region changes hands.
//!
//! The record is a length-delimited binary layout (magic, event code,
//! timestamp, region name, origin server, opaque payload). The payload slot
//! carries delimited descriptor packs for merge announcements; see
//! [`write_delimited`] / [`read_delimited`].

use serde::{Deserialize, Serialize};

use crate::{unix_millis, RegionDescriptor, ServerName, TableName};

/// Magic bytes identifying a serialized transition record.
pub const TRANSITION_MAGIC: [u8; 4] = *b"SBTR";

/// Events a data-node publishes for a region in transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum RegionEventType {
    /// The node is merging two regions; the merged region is claimed.
    RegionMerging = 1,
    /// The merge is complete and announced to the controller.
    RegionMerge = 2,
}

impl RegionEventType {
    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decode a wire code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::RegionMerging),
            2 => Some(Self::RegionMerge),
            _ => None,
        }
    }
}

/// A transition record: who is doing what to which region, when, with an
/// optional event-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTransition {
    event: RegionEventType,
    region_name: Vec<u8>,
    origin: ServerName,
    created_ms: u64,
    payload: Vec<u8>,
}

impl RegionTransition {
    /// Create a record stamped with the current wall clock and no payload.
    pub fn new(event: RegionEventType, region_name: Vec<u8>, origin: ServerName) -> Self {
        Self {
            event,
            region_name,
            origin,
            created_ms: unix_millis(),
            payload: Vec::new(),
        }
    }

    /// Attach an event-specific payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// The event this record announces.
    #[must_use]
    pub const fn event(&self) -> RegionEventType {
        self.event
    }

    /// Binary name of the region in transition.
    #[must_use]
    pub fn region_name(&self) -> &[u8] {
        &self.region_name
    }

    /// The server the event originates from.
    #[must_use]
    pub const fn origin(&self) -> &ServerName {
        &self.origin
    }

    /// Wall-clock stamp at record creation, millis since epoch.
    #[must_use]
    pub const fn created_ms(&self) -> u64 {
        self.created_ms
    }

    /// Event-specific payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize the record for durable storage in a coordination node.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            4 + 2 + 8 + 4 + self.region_name.len() + 4 + self.origin.host().len() + 2 + 8 + 4
                + self.payload.len(),
        );
        buf.extend_from_slice(&TRANSITION_MAGIC);
        buf.extend_from_slice(&self.event.code().to_le_bytes());
        buf.extend_from_slice(&self.created_ms.to_le_bytes());
        put_bytes(&mut buf, &self.region_name);
        put_bytes(&mut buf, self.origin.host().as_bytes());
        buf.extend_from_slice(&self.origin.port().to_le_bytes());
        buf.extend_from_slice(&self.origin.start_code().to_le_bytes());
        put_bytes(&mut buf, &self.payload);
        buf
    }

    /// Deserialize a record.
    ///
    /// Returns `None` if the buffer is truncated or has incorrect magic.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        if r.take(4)? != TRANSITION_MAGIC {
            return None;
        }
        let event = RegionEventType::from_code(r.u16()?)?;
        let created_ms = r.u64()?;
        let region_name = r.bytes()?.to_vec();
        let host = String::from_utf8(r.bytes()?.to_vec()).ok()?;
        let port = r.u16()?;
        let start_code = r.u64()?;
        let payload = r.bytes()?.to_vec();
        Some(Self {
            event,
            region_name,
            origin: ServerName::new(host, port, start_code),
            created_ms,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Delimited descriptor packs
// ---------------------------------------------------------------------------

/// Serialize an ordered pack of descriptors as a transition payload.
#[must_use]
pub fn write_delimited(descriptors: &[RegionDescriptor]) -> Vec<u8> {
    let count = u32::try_from(descriptors.len()).unwrap_or(u32::MAX);
    let mut buf = Vec::new();
    buf.extend_from_slice(&count.to_le_bytes());
    for d in descriptors {
        put_bytes(&mut buf, d.table().as_str().as_bytes());
        put_bytes(&mut buf, d.start_key());
        put_bytes(&mut buf, d.end_key());
        buf.extend_from_slice(&d.region_id().to_le_bytes());
    }
    buf
}

/// Deserialize a descriptor pack.
///
/// Returns `None` on truncation or malformed fields.
#[must_use]
pub fn read_delimited(data: &[u8]) -> Option<Vec<RegionDescriptor>> {
    let mut r = Reader::new(data);
    let count = r.u32()? as usize;
    let mut out = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let table = String::from_utf8(r.bytes()?.to_vec()).ok()?;
        let start = r.bytes()?.to_vec();
        let end = r.bytes()?.to_vec();
        let id = r.u64()?;
        out.push(RegionDescriptor::new(TableName::new(table), start, end, id));
    }
    Some(out)
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.data.len() {
            return None;
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|s| u16::from_le_bytes([s[0], s[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).and_then(|s| {
            let arr: [u8; 8] = s.try_into().ok()?;
            Some(u64::from_le_bytes(arr))
        })
    }

    fn bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

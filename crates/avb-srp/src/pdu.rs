//! MSRP PDU codec
//!
//! SRP uses first-value encoding: a vector carries one encoded first value
//! and a run of packed per-attribute events, and the receiver reconstructs
//! the i-th attribute by adding i to the first value's StreamID (and DestMAC
//! for Talker attributes). The encoder exploits the same rule in reverse,
//! merging an attribute into the open vector whenever the reconstruction at
//! the next index would reproduce it exactly.
//!
//! Listener vectors additionally carry four-packed declaration events after
//! the three-packed attribute events.

use mrp::events::{three_packed_get, three_packed_len, three_packed_set};
use mrp::pdu::{read_u16_be, read_u32_be, read_u48_be, read_u64_be, write_u16_be, write_u32_be, write_u48_be, write_u64_be};
use mrp::{AttributeEvent, MsgHeader, VectorHeader};

use crate::attribute::AttributeKind;
use crate::config::{MAX_ATTRIBUTES, SRCLASS_DEFAULT, TSPEC_PRIORITY_DEFAULT};
use crate::reservation::ReservationInfo;
use crate::srp::Srp;
use crate::{AvbApi, DataPath, MacAddr, SrpError, StreamId};

/// Encoded size of a Talker Advertise first value
pub const TALKER_FIRST_VALUE_LEN: usize = 25;
/// Encoded size of a Talker Failed first value
pub const TALKER_FAILED_FIRST_VALUE_LEN: usize = 34;
/// Encoded size of a Listener first value
pub const LISTENER_FIRST_VALUE_LEN: usize = 8;
/// Encoded size of a Domain first value
pub const DOMAIN_FIRST_VALUE_LEN: usize = 4;

const THREE_PACKED_MAX: usize = MAX_ATTRIBUTES.div_ceil(3);
const FOUR_PACKED_MAX: usize = MAX_ATTRIBUTES.div_ceil(4);

/// Talker Advertise / Talker Failed first value
///
/// The failure fields are present on the wire for Talker Failed only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TalkerFirstValue {
    pub stream_id: StreamId,
    pub dest_mac_addr: MacAddr,
    pub vlan_id: u16,
    pub tspec_max_frame_size: u16,
    pub tspec_max_interval: u16,
    pub tspec: u8,
    pub accumulated_latency: u32,
    pub failure_bridge_id: [u8; 8],
    pub failure_code: u8,
}

impl TalkerFirstValue {
    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8], failed: bool) -> Option<Self> {
        let len = if failed {
            TALKER_FAILED_FIRST_VALUE_LEN
        } else {
            TALKER_FIRST_VALUE_LEN
        };
        if bytes.len() < len {
            return None;
        }

        let mut value = Self {
            stream_id: StreamId(read_u64_be(bytes, 0)),
            dest_mac_addr: MacAddr::from_u48(read_u48_be(bytes, 8)),
            vlan_id: read_u16_be(bytes, 14),
            tspec_max_frame_size: read_u16_be(bytes, 16),
            tspec_max_interval: read_u16_be(bytes, 18),
            tspec: bytes[20],
            accumulated_latency: read_u32_be(bytes, 21),
            failure_bridge_id: [0; 8],
            failure_code: 0,
        };
        if failed {
            value.failure_bridge_id.copy_from_slice(&bytes[25..33]);
            value.failure_code = bytes[33];
        }

        Some(value)
    }

    /// Build the first value for a cached reservation; a zero VLAN encodes
    /// the domain VLAN instead
    pub fn from_reservation(reservation: &ReservationInfo, domain_vlan: u16) -> Self {
        Self {
            stream_id: reservation.stream_id,
            dest_mac_addr: reservation.dest_mac_addr,
            vlan_id: if reservation.vlan_id != 0 {
                reservation.vlan_id
            } else {
                domain_vlan
            },
            tspec_max_frame_size: reservation.tspec_max_frame_size,
            tspec_max_interval: reservation.tspec_max_interval,
            tspec: reservation.tspec,
            accumulated_latency: reservation.accumulated_latency,
            failure_bridge_id: reservation.failure_bridge_id,
            failure_code: reservation.failure_code,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self, buf: &mut [u8], failed: bool) -> usize {
        let len = if failed {
            TALKER_FAILED_FIRST_VALUE_LEN
        } else {
            TALKER_FIRST_VALUE_LEN
        };
        assert!(buf.len() >= len, "Buffer too small");

        write_u64_be(buf, 0, self.stream_id.0);
        write_u48_be(buf, 8, self.dest_mac_addr.to_u48());
        write_u16_be(buf, 14, self.vlan_id);
        write_u16_be(buf, 16, self.tspec_max_frame_size);
        write_u16_be(buf, 18, self.tspec_max_interval);
        buf[20] = self.tspec;
        write_u32_be(buf, 21, self.accumulated_latency);
        if failed {
            buf[25..33].copy_from_slice(&self.failure_bridge_id);
            buf[33] = self.failure_code;
        }

        len
    }

    /// StreamID and DestMAC reconstructed for the attribute at `index`
    /// within the vector
    pub fn at_index(&self, index: u16) -> (StreamId, MacAddr) {
        (
            StreamId(self.stream_id.0.wrapping_add(index as u64)),
            MacAddr::from_u48(self.dest_mac_addr.to_u48().wrapping_add(index as u64)),
        )
    }

    /// SR class priority from the TSpec byte
    pub fn sr_class_priority(&self) -> u8 {
        (self.tspec >> 5) & 7
    }
}

/// Listener first value: just the StreamID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ListenerFirstValue {
    pub stream_id: StreamId,
}

impl ListenerFirstValue {
    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LISTENER_FIRST_VALUE_LEN {
            return None;
        }
        Some(Self {
            stream_id: StreamId(read_u64_be(bytes, 0)),
        })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        assert!(buf.len() >= LISTENER_FIRST_VALUE_LEN, "Buffer too small");
        write_u64_be(buf, 0, self.stream_id.0);
        LISTENER_FIRST_VALUE_LEN
    }

    /// StreamID reconstructed for the attribute at `index` within the vector
    pub fn stream_id_at(&self, index: u16) -> StreamId {
        StreamId(self.stream_id.0.wrapping_add(index as u64))
    }
}

/// Domain first value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DomainFirstValue {
    pub sr_class_id: u8,
    pub sr_class_priority: u8,
    pub sr_class_vid: u16,
}

impl DomainFirstValue {
    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DOMAIN_FIRST_VALUE_LEN {
            return None;
        }
        Some(Self {
            sr_class_id: bytes[0],
            sr_class_priority: bytes[1],
            sr_class_vid: read_u16_be(bytes, 2),
        })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        assert!(buf.len() >= DOMAIN_FIRST_VALUE_LEN, "Buffer too small");
        buf[0] = self.sr_class_id;
        buf[1] = self.sr_class_priority;
        write_u16_be(buf, 2, self.sr_class_vid);
        DOMAIN_FIRST_VALUE_LEN
    }
}

/// Listener declaration, four-packed after the attribute events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FourPackedEvent {
    Ignore = 0,
    AskingFailed = 1,
    Ready = 2,
    ReadyFailed = 3,
}

impl FourPackedEvent {
    /// Decode from the 0..=3 wire value
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(FourPackedEvent::Ignore),
            1 => Some(FourPackedEvent::AskingFailed),
            2 => Some(FourPackedEvent::Ready),
            3 => Some(FourPackedEvent::ReadyFailed),
            _ => None,
        }
    }
}

/// Number of bytes needed for `count` four-packed events
pub const fn four_packed_len(count: usize) -> usize {
    count.div_ceil(4)
}

/// Append the declaration for the attribute at `index` within the vector
pub fn four_packed_set(buf: &mut [u8], index: usize, event: FourPackedEvent) {
    let byte = index / 4;
    let shift = 6 - 2 * (index % 4);
    if index % 4 == 0 {
        buf[byte] = (event as u8) << shift;
    } else {
        buf[byte] |= (event as u8) << shift;
    }
}

/// Extract the declaration for the attribute at `index` within the vector
pub fn four_packed_get(buf: &[u8], index: usize) -> Option<FourPackedEvent> {
    let byte = *buf.get(index / 4)?;
    let shift = 6 - 2 * (index % 4);
    FourPackedEvent::from_value((byte >> shift) & 0x3)
}

/// An MSRP vector under construction
///
/// The encoder asks, attribute by attribute, whether the open vector can
/// absorb it; on the first value the fields are populated, on every merge the
/// packed event streams grow and `NumberOfValues` advances.
pub struct VectorBuilder {
    pub(crate) attribute_type: u8,
    pub(crate) leave_all: bool,
    pub(crate) number_of_values: u16,
    pub(crate) first_value: [u8; TALKER_FAILED_FIRST_VALUE_LEN],
    pub(crate) first_value_len: usize,
    pub(crate) three_packed: [u8; THREE_PACKED_MAX],
    pub(crate) four_packed: [u8; FOUR_PACKED_MAX],
}

impl VectorBuilder {
    /// Open an empty vector for the given wire attribute type
    pub fn new(attribute_type: u8) -> Self {
        let first_value_len = match attribute_type {
            1 => TALKER_FIRST_VALUE_LEN,
            2 => TALKER_FAILED_FIRST_VALUE_LEN,
            3 => LISTENER_FIRST_VALUE_LEN,
            _ => DOMAIN_FIRST_VALUE_LEN,
        };
        Self {
            attribute_type,
            leave_all: false,
            number_of_values: 0,
            first_value: [0; TALKER_FAILED_FIRST_VALUE_LEN],
            first_value_len,
            three_packed: [0; THREE_PACKED_MAX],
            four_packed: [0; FOUR_PACKED_MAX],
        }
    }

    /// Mark the enclosing vector as carrying a LeaveAll event
    pub fn set_leave_all(&mut self) {
        self.leave_all = true;
    }

    /// Attributes merged so far
    pub fn number_of_values(&self) -> u16 {
        self.number_of_values
    }

    /// First-value bytes of the open vector
    pub fn first_value(&self) -> &[u8] {
        &self.first_value[..self.first_value_len]
    }

    /// Attribute event at `index`
    pub fn three_packed_event(&self, index: usize) -> Option<AttributeEvent> {
        if index as u16 >= self.number_of_values {
            return None;
        }
        three_packed_get(&self.three_packed, index)
    }

    /// Listener declaration at `index` (Listener vectors only)
    pub fn four_packed_event(&self, index: usize) -> Option<FourPackedEvent> {
        if index as u16 >= self.number_of_values {
            return None;
        }
        four_packed_get(&self.four_packed, index)
    }

    /// Size of the finished vector in octets
    pub fn encoded_len(&self) -> usize {
        let events = three_packed_len(self.number_of_values as usize);
        let declarations = if self.attribute_type == AttributeKind::Listener.wire_type() {
            four_packed_len(self.number_of_values as usize)
        } else {
            0
        };
        MsgHeader::LEN + VectorHeader::LEN + self.first_value_len + events + declarations
    }

    /// Serialize message header, vector header, first value and the packed
    /// event streams
    pub fn finish(&self, buf: &mut [u8]) -> usize {
        let total = self.encoded_len();
        assert!(buf.len() >= total, "Buffer too small");

        let mut offset = MsgHeader {
            attribute_type: self.attribute_type,
            attribute_length: self.first_value_len as u8,
        }
        .to_bytes(buf);
        offset += VectorHeader {
            leave_all_event: self.leave_all as u8,
            number_of_values: self.number_of_values,
        }
        .to_bytes(&mut buf[offset..]);

        buf[offset..offset + self.first_value_len]
            .copy_from_slice(&self.first_value[..self.first_value_len]);
        offset += self.first_value_len;

        let events = three_packed_len(self.number_of_values as usize);
        buf[offset..offset + events].copy_from_slice(&self.three_packed[..events]);
        offset += events;

        if self.attribute_type == AttributeKind::Listener.wire_type() {
            let declarations = four_packed_len(self.number_of_values as usize);
            buf[offset..offset + declarations].copy_from_slice(&self.four_packed[..declarations]);
            offset += declarations;
        }

        offset
    }
}

impl<P: DataPath + AvbApi, const PORTS: usize> Srp<P, PORTS> {
    /// Try to merge `attr` into the open vector, appending `event`.
    ///
    /// Returns true on merge; false means the attribute belongs in a
    /// different vector and the engine should close this one first.
    pub fn encode_attribute(
        &self,
        vector: &mut VectorBuilder,
        attr: usize,
        event: AttributeEvent,
    ) -> bool {
        match self.pool.get(attr).kind {
            AttributeKind::TalkerAdvertise | AttributeKind::TalkerFailed => {
                self.encode_talker(vector, attr, event)
            }
            AttributeKind::Listener => self.encode_listener(vector, attr, event),
            AttributeKind::Domain => self.encode_domain(vector, event),
        }
    }

    fn encode_talker(&self, vector: &mut VectorBuilder, attr: usize, event: AttributeEvent) -> bool {
        let record = self.pool.get(attr);
        if vector.attribute_type != record.kind.wire_type() {
            return false;
        }
        let failed = record.kind == AttributeKind::TalkerFailed;

        let (slot, _) = self.stream_slot(attr);
        let reservation = &self.table.entry(slot).reservation;

        let merge = if vector.number_of_values == 0 {
            true
        } else {
            self.check_talker_merge(vector, reservation)
        };

        if merge {
            if vector.number_of_values == 0 {
                let first_value = TalkerFirstValue::from_reservation(reservation, self.domain.vlan_id);
                first_value.to_bytes(&mut vector.first_value, failed);
            }
            three_packed_set(&mut vector.three_packed, vector.number_of_values as usize, event);
            vector.number_of_values += 1;
        }

        merge
    }

    /// An attribute merges when reconstructing the vector's first value at
    /// the next index yields exactly this attribute's DestMAC, StreamID,
    /// VLAN and MaxFrameSize.
    fn check_talker_merge(&self, vector: &VectorBuilder, reservation: &ReservationInfo) -> bool {
        let Some(base) = TalkerFirstValue::from_bytes(vector.first_value(), false) else {
            return false;
        };
        let (stream_id, dest_mac) = base.at_index(vector.number_of_values);

        dest_mac == reservation.dest_mac_addr
            && stream_id == reservation.stream_id
            && base.vlan_id == reservation.vlan_id
            && base.tspec_max_frame_size == reservation.tspec_max_frame_size
    }

    fn encode_listener(&self, vector: &mut VectorBuilder, attr: usize, event: AttributeEvent) -> bool {
        let record = self.pool.get(attr);
        if vector.attribute_type != AttributeKind::Listener.wire_type() {
            return false;
        }

        let (slot, stream_id) = self.stream_slot(attr);

        let merge = if vector.number_of_values == 0 {
            true
        } else {
            ListenerFirstValue::from_bytes(vector.first_value())
                .map_or(false, |base| base.stream_id_at(vector.number_of_values) == stream_id)
        };

        if merge {
            if vector.number_of_values == 0 {
                ListenerFirstValue { stream_id }.to_bytes(&mut vector.first_value);
            }
            three_packed_set(&mut vector.three_packed, vector.number_of_values as usize, event);

            let entry = self.table.entry(slot);
            let declaration = if entry.talker_present
                && !self.domain.boundary_port[record.port as usize]
                && !entry.reservation_failed
            {
                FourPackedEvent::Ready
            } else {
                FourPackedEvent::AskingFailed
            };
            four_packed_set(&mut vector.four_packed, vector.number_of_values as usize, declaration);

            vector.number_of_values += 1;
        }

        merge
    }

    fn encode_domain(&self, vector: &mut VectorBuilder, event: AttributeEvent) -> bool {
        if vector.attribute_type != AttributeKind::Domain.wire_type() {
            return false;
        }

        // Domain attributes never share a vector
        if vector.number_of_values != 0 {
            return false;
        }

        DomainFirstValue {
            sr_class_id: SRCLASS_DEFAULT,
            sr_class_priority: TSPEC_PRIORITY_DEFAULT,
            sr_class_vid: self.domain.vlan_id,
        }
        .to_bytes(&mut vector.first_value);
        three_packed_set(&mut vector.three_packed, 0, event);
        vector.number_of_values = 1;

        true
    }

    /// Match an incoming Talker first value at `index` against `attr`.
    ///
    /// On a match in endpoint mode the attribute and its slot absorb the
    /// declaration: the kind follows the failed flag, a wrong SR class marks
    /// the reservation failed, and the first Talker arrival fills the cached
    /// reservation body.
    pub fn match_talker_advertise(
        &mut self,
        attr: usize,
        first_value: &[u8],
        index: u16,
        leave_all: bool,
        failed: bool,
    ) -> bool {
        let Some(slot) = self.pool.get(attr).stream else {
            return false;
        };
        let my_stream_id = self.table.entry(slot).reservation.stream_id;
        let Some(fv) = TalkerFirstValue::from_bytes(first_value, failed) else {
            return false;
        };
        let (stream_id, dest_mac) = fv.at_index(index);

        if PORTS == 1 && !leave_all && stream_id == my_stream_id {
            if fv.sr_class_priority() != TSPEC_PRIORITY_DEFAULT {
                self.table.entry_mut(slot).reservation_failed = true;
                return false;
            }

            if failed {
                self.pool.get_mut(attr).kind = AttributeKind::TalkerFailed;
                let entry = self.table.entry_mut(slot);
                entry.reservation_failed = true;
                entry.reservation.failure_bridge_id = fv.failure_bridge_id;
                entry.reservation.failure_code = fv.failure_code;
            } else {
                self.pool.get_mut(attr).kind = AttributeKind::TalkerAdvertise;
                let entry = self.table.entry_mut(slot);
                if entry.reservation_failed {
                    entry.reservation.failure_bridge_id = [0; 8];
                    entry.reservation.failure_code = 0;
                }
                entry.reservation_failed = false;
            }

            if !self.table.entry(slot).talker_present {
                let reservation = ReservationInfo {
                    stream_id: my_stream_id,
                    dest_mac_addr: dest_mac,
                    vlan_id: fv.vlan_id,
                    tspec: fv.tspec,
                    tspec_max_frame_size: fv.tspec_max_frame_size,
                    tspec_max_interval: fv.tspec_max_interval,
                    accumulated_latency: fv.accumulated_latency,
                    failure_bridge_id: [0; 8],
                    failure_code: 0,
                };
                // The slot for this id exists, so the upsert cannot fail
                let result = self.table.add_full(&reservation);
                debug_assert!(result.is_ok());
            }
        }

        stream_id == my_stream_id
    }

    /// Match an incoming Listener first value at `index` against `attr`.
    /// An `Ignore` declaration never matches.
    pub fn match_listener(
        &self,
        attr: usize,
        first_value: &[u8],
        index: u16,
        event: FourPackedEvent,
    ) -> bool {
        let Some(slot) = self.pool.get(attr).stream else {
            return false;
        };
        if event == FourPackedEvent::Ignore {
            return false;
        }
        let Some(fv) = ListenerFirstValue::from_bytes(first_value) else {
            return false;
        };
        fv.stream_id_at(index) == self.table.entry(slot).reservation.stream_id
    }

    /// First sighting of a stream on the wire: reconstruct the attribute at
    /// `index`, upsert the reservation table and allocate a snooped
    /// attribute record for the MRP engine to register against.
    pub fn process_new_attribute_from_packet(
        &mut self,
        wire_type: u8,
        first_value: &[u8],
        index: u16,
        port: u8,
    ) -> Result<usize, SrpError> {
        let kind = AttributeKind::from_wire(wire_type).ok_or(SrpError::UnsupportedAttribute)?;

        let slot = match kind {
            AttributeKind::TalkerAdvertise | AttributeKind::TalkerFailed => {
                let fv = TalkerFirstValue::from_bytes(first_value, false)
                    .ok_or(SrpError::MalformedPdu)?;
                let (stream_id, dest_mac) = fv.at_index(index);
                let reservation = ReservationInfo {
                    stream_id,
                    dest_mac_addr: dest_mac,
                    vlan_id: fv.vlan_id,
                    tspec: fv.tspec,
                    tspec_max_frame_size: fv.tspec_max_frame_size,
                    tspec_max_interval: fv.tspec_max_interval,
                    accumulated_latency: fv.accumulated_latency,
                    failure_bridge_id: [0; 8],
                    failure_code: 0,
                };
                self.table.add_full(&reservation)?
            }
            AttributeKind::Listener => {
                let fv =
                    ListenerFirstValue::from_bytes(first_value).ok_or(SrpError::MalformedPdu)?;
                self.table.add_id_only(fv.stream_id_at(index))?
            }
            AttributeKind::Domain => return Err(SrpError::UnsupportedAttribute),
        };

        self.pool.alloc(kind, port, false, Some(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestPlatform;
    use proptest::prelude::*;

    fn reservation(id: u64, mac: u64) -> ReservationInfo {
        ReservationInfo {
            stream_id: StreamId(id),
            dest_mac_addr: MacAddr::from_u48(mac),
            vlan_id: 2,
            tspec: 3 << 5,
            tspec_max_frame_size: 200,
            tspec_max_interval: 1,
            accumulated_latency: 3000,
            ..Default::default()
        }
    }

    fn srp_with_listeners(ids: &[u64]) -> (Srp<TestPlatform, 1>, std::vec::Vec<usize>) {
        let mut srp: Srp<TestPlatform, 1> = Srp::new(TestPlatform::new());
        let mut attrs = std::vec::Vec::new();
        for id in ids {
            let slot = srp.table.add_id_only(StreamId(*id)).unwrap();
            let attr = srp
                .pool
                .alloc(AttributeKind::Listener, 0, false, Some(slot))
                .unwrap();
            srp.pool.mad_begin(attr);
            attrs.push(attr);
        }
        (srp, attrs)
    }

    #[test]
    fn test_talker_first_value_round_trip() {
        let fv = TalkerFirstValue {
            stream_id: StreamId(0xAABB_CCDD_EEFF_0001),
            dest_mac_addr: MacAddr::new([0x91, 0xE0, 0xF0, 0x00, 0x00, 0x01]),
            vlan_id: 2,
            tspec_max_frame_size: 200,
            tspec_max_interval: 1,
            tspec: 3 << 5,
            accumulated_latency: 500_000,
            failure_bridge_id: [9; 8],
            failure_code: 1,
        };

        let mut buf = [0u8; TALKER_FAILED_FIRST_VALUE_LEN];
        assert_eq!(fv.to_bytes(&mut buf, true), TALKER_FAILED_FIRST_VALUE_LEN);
        assert_eq!(TalkerFirstValue::from_bytes(&buf, true), Some(fv));

        // Without the failed flag the failure fields stay clear
        let advertise = TalkerFirstValue::from_bytes(&buf, false).unwrap();
        assert_eq!(advertise.failure_bridge_id, [0; 8]);
        assert_eq!(advertise.failure_code, 0);
        assert_eq!(advertise.stream_id, fv.stream_id);
    }

    #[test]
    fn test_listener_merge_consecutive_ids() {
        // E7: two Listeners with consecutive StreamIDs share one vector
        let (srp, attrs) = srp_with_listeners(&[0x1000, 0x1001]);

        let mut vector = VectorBuilder::new(AttributeKind::Listener.wire_type());
        assert!(srp.encode_attribute(&mut vector, attrs[0], AttributeEvent::JoinIn));
        assert!(srp.encode_attribute(&mut vector, attrs[1], AttributeEvent::JoinIn));
        assert_eq!(vector.number_of_values(), 2);

        let base = ListenerFirstValue::from_bytes(vector.first_value()).unwrap();
        assert_eq!(base.stream_id, StreamId(0x1000));
        assert_eq!(base.stream_id_at(1), StreamId(0x1001));
    }

    #[test]
    fn test_listener_merge_rejects_gap() {
        let (srp, attrs) = srp_with_listeners(&[0x1000, 0x1002]);

        let mut vector = VectorBuilder::new(AttributeKind::Listener.wire_type());
        assert!(srp.encode_attribute(&mut vector, attrs[0], AttributeEvent::JoinIn));
        assert!(!srp.encode_attribute(&mut vector, attrs[1], AttributeEvent::JoinIn));
        assert_eq!(vector.number_of_values(), 1);
    }

    #[test]
    fn test_listener_encodes_ready_or_asking_failed() {
        // E3/E4: boundary port or a failed reservation forces Asking Failed
        let mut srp: Srp<TestPlatform, 1> = Srp::new(TestPlatform::new());
        let slot = srp.table.add_full(&reservation(0x2000, 0x91E0_F000_0001)).unwrap();
        let attr = srp
            .pool
            .alloc(AttributeKind::Listener, 0, false, Some(slot))
            .unwrap();
        srp.pool.mad_begin(attr);

        // Talker present but the port is still a domain boundary
        let mut vector = VectorBuilder::new(AttributeKind::Listener.wire_type());
        assert!(srp.encode_attribute(&mut vector, attr, AttributeEvent::JoinIn));
        assert_eq!(vector.four_packed_event(0), Some(FourPackedEvent::AskingFailed));

        srp.domain_mut().boundary_port[0] = false;
        let mut vector = VectorBuilder::new(AttributeKind::Listener.wire_type());
        assert!(srp.encode_attribute(&mut vector, attr, AttributeEvent::JoinIn));
        assert_eq!(vector.four_packed_event(0), Some(FourPackedEvent::Ready));

        srp.table.entry_mut(slot).reservation_failed = true;
        let mut vector = VectorBuilder::new(AttributeKind::Listener.wire_type());
        assert!(srp.encode_attribute(&mut vector, attr, AttributeEvent::JoinIn));
        assert_eq!(vector.four_packed_event(0), Some(FourPackedEvent::AskingFailed));
    }

    #[test]
    fn test_talker_merge_requires_all_fields() {
        let mut srp: Srp<TestPlatform, 1> = Srp::new(TestPlatform::new());
        let slot_a = srp.table.add_full(&reservation(0x3000, 0x91E0_F000_0010)).unwrap();
        let slot_b = srp.table.add_full(&reservation(0x3001, 0x91E0_F000_0011)).unwrap();
        // Same spacing but different frame size: no merge
        let mut other = reservation(0x3002, 0x91E0_F000_0012);
        other.tspec_max_frame_size = 100;
        let slot_c = srp.table.add_full(&other).unwrap();

        let attrs: std::vec::Vec<usize> = [slot_a, slot_b, slot_c]
            .iter()
            .map(|slot| {
                let attr = srp
                    .pool
                    .alloc(AttributeKind::TalkerAdvertise, 0, true, Some(*slot))
                    .unwrap();
                srp.pool.mad_join(attr, true);
                attr
            })
            .collect();

        let mut vector = VectorBuilder::new(AttributeKind::TalkerAdvertise.wire_type());
        assert!(srp.encode_attribute(&mut vector, attrs[0], AttributeEvent::New));
        assert!(srp.encode_attribute(&mut vector, attrs[1], AttributeEvent::New));
        assert!(!srp.encode_attribute(&mut vector, attrs[2], AttributeEvent::New));
        assert_eq!(vector.number_of_values(), 2);

        // The merged vector reconstructs each original attribute
        let base = TalkerFirstValue::from_bytes(vector.first_value(), false).unwrap();
        let (id1, mac1) = base.at_index(1);
        assert_eq!(id1, StreamId(0x3001));
        assert_eq!(mac1, MacAddr::from_u48(0x91E0_F000_0011));
    }

    #[test]
    fn test_talker_kind_does_not_cross_vectors() {
        let mut srp: Srp<TestPlatform, 1> = Srp::new(TestPlatform::new());
        let slot = srp.table.add_full(&reservation(0x4000, 0x91E0_F000_0001)).unwrap();
        let attr = srp
            .pool
            .alloc(AttributeKind::TalkerFailed, 0, false, Some(slot))
            .unwrap();
        srp.pool.mad_begin(attr);

        let mut vector = VectorBuilder::new(AttributeKind::TalkerAdvertise.wire_type());
        assert!(!srp.encode_attribute(&mut vector, attr, AttributeEvent::JoinIn));

        let mut vector = VectorBuilder::new(AttributeKind::TalkerFailed.wire_type());
        assert!(srp.encode_attribute(&mut vector, attr, AttributeEvent::JoinIn));
        assert_eq!(vector.first_value().len(), TALKER_FAILED_FIRST_VALUE_LEN);
    }

    #[test]
    fn test_talker_encode_substitutes_domain_vlan() {
        let mut srp: Srp<TestPlatform, 1> = Srp::new(TestPlatform::new());
        let mut info = reservation(0x5000, 0x91E0_F000_0001);
        info.vlan_id = 0;
        let slot = srp.table.add_full(&info).unwrap();
        let attr = srp
            .pool
            .alloc(AttributeKind::TalkerAdvertise, 0, true, Some(slot))
            .unwrap();
        srp.pool.mad_join(attr, true);

        let mut vector = VectorBuilder::new(AttributeKind::TalkerAdvertise.wire_type());
        assert!(srp.encode_attribute(&mut vector, attr, AttributeEvent::New));
        let base = TalkerFirstValue::from_bytes(vector.first_value(), false).unwrap();
        assert_eq!(base.vlan_id, crate::config::DEFAULT_VLAN);
    }

    #[test]
    fn test_domain_never_merges() {
        let srp: Srp<TestPlatform, 2> = Srp::new(TestPlatform::new());
        let domain_attr = srp.domain().attrs[0].unwrap();

        let mut vector = VectorBuilder::new(AttributeKind::Domain.wire_type());
        assert!(srp.encode_attribute(&mut vector, domain_attr, AttributeEvent::JoinIn));
        assert!(!srp.encode_attribute(&mut vector, domain_attr, AttributeEvent::JoinIn));
        assert_eq!(vector.number_of_values(), 1);

        let base = DomainFirstValue::from_bytes(vector.first_value()).unwrap();
        assert_eq!(base.sr_class_id, SRCLASS_DEFAULT);
        assert_eq!(base.sr_class_priority, TSPEC_PRIORITY_DEFAULT);
        assert_eq!(base.sr_class_vid, crate::config::DEFAULT_VLAN);
    }

    #[test]
    fn test_finish_layout_round_trips() {
        let (srp, attrs) = srp_with_listeners(&[0x6000, 0x6001, 0x6002]);

        let mut vector = VectorBuilder::new(AttributeKind::Listener.wire_type());
        for attr in &attrs {
            assert!(srp.encode_attribute(&mut vector, *attr, AttributeEvent::JoinIn));
        }

        let mut buf = [0u8; 64];
        let len = vector.finish(&mut buf);
        // header(2) + vector header(2) + first value(8) + 1 three-packed +
        // 1 four-packed
        assert_eq!(len, 2 + 2 + 8 + 1 + 1);

        let msg = mrp::MsgHeader::from_bytes(&buf).unwrap();
        assert_eq!(msg.attribute_type, AttributeKind::Listener.wire_type());
        assert_eq!(msg.attribute_length as usize, LISTENER_FIRST_VALUE_LEN);

        let vh = mrp::VectorHeader::from_bytes(&buf[2..]).unwrap();
        assert_eq!(vh.number_of_values, 3);

        let base = ListenerFirstValue::from_bytes(&buf[4..]).unwrap();
        for i in 0..3u16 {
            assert_eq!(base.stream_id_at(i), StreamId(0x6000 + i as u64));
        }
    }

    #[test]
    fn test_match_talker_wrong_class_marks_failed() {
        // E4: priority 5 instead of 3
        let (mut srp, attrs) = srp_with_listeners(&[0x7000]);
        let fv = TalkerFirstValue {
            stream_id: StreamId(0x7000),
            dest_mac_addr: MacAddr::from_u48(0x91E0_F000_0001),
            vlan_id: 2,
            tspec_max_frame_size: 200,
            tspec_max_interval: 1,
            tspec: 5 << 5,
            accumulated_latency: 0,
            ..Default::default()
        };
        let mut buf = [0u8; TALKER_FIRST_VALUE_LEN];
        fv.to_bytes(&mut buf, false);

        // Pair the listener's slot with a talker attribute to match against
        let slot = srp.pool.get(attrs[0]).stream.unwrap();
        let talker = srp
            .pool
            .alloc(AttributeKind::TalkerAdvertise, 0, false, Some(slot))
            .unwrap();
        srp.pool.mad_begin(talker);

        assert!(!srp.match_talker_advertise(talker, &buf, 0, false, false));
        assert!(srp.table.entry(slot).reservation_failed);
        assert!(!srp.table.entry(slot).talker_present);
    }

    #[test]
    fn test_match_talker_fills_slot_once() {
        let (mut srp, attrs) = srp_with_listeners(&[0x8000]);
        let slot = srp.pool.get(attrs[0]).stream.unwrap();
        let talker = srp
            .pool
            .alloc(AttributeKind::TalkerAdvertise, 0, false, Some(slot))
            .unwrap();
        srp.pool.mad_begin(talker);

        let fv = TalkerFirstValue {
            stream_id: StreamId(0x8000),
            dest_mac_addr: MacAddr::from_u48(0x91E0_F000_0001),
            vlan_id: 2,
            tspec_max_frame_size: 200,
            tspec_max_interval: 1,
            tspec: 3 << 5,
            accumulated_latency: 9000,
            ..Default::default()
        };
        let mut buf = [0u8; TALKER_FIRST_VALUE_LEN];
        fv.to_bytes(&mut buf, false);

        assert!(srp.match_talker_advertise(talker, &buf, 0, false, false));
        let entry = srp.table.entry(slot);
        assert!(entry.talker_present);
        assert_eq!(entry.reservation.dest_mac_addr, fv.dest_mac_addr);
        assert_eq!(entry.reservation.accumulated_latency, 9000);

        // An index match also works against a shifted base
        let mut shifted = fv;
        shifted.stream_id = StreamId(0x7FFE);
        shifted.dest_mac_addr = MacAddr::from_u48(0x91E0_F000_0001 - 2);
        shifted.to_bytes(&mut buf, false);
        assert!(srp.match_talker_advertise(talker, &buf, 2, false, false));
        assert!(!srp.match_talker_advertise(talker, &buf, 1, false, false));
    }

    #[test]
    fn test_match_talker_failed_records_failure() {
        let (mut srp, attrs) = srp_with_listeners(&[0x9000]);
        let slot = srp.pool.get(attrs[0]).stream.unwrap();
        let talker = srp
            .pool
            .alloc(AttributeKind::TalkerAdvertise, 0, false, Some(slot))
            .unwrap();
        srp.pool.mad_begin(talker);

        let fv = TalkerFirstValue {
            stream_id: StreamId(0x9000),
            dest_mac_addr: MacAddr::from_u48(0x91E0_F000_0001),
            vlan_id: 2,
            tspec_max_frame_size: 200,
            tspec_max_interval: 1,
            tspec: 3 << 5,
            accumulated_latency: 0,
            failure_bridge_id: [0xBB; 8],
            failure_code: 8,
        };
        let mut buf = [0u8; TALKER_FAILED_FIRST_VALUE_LEN];
        fv.to_bytes(&mut buf, true);

        assert!(srp.match_talker_advertise(talker, &buf, 0, false, true));
        assert_eq!(srp.pool.get(talker).kind, AttributeKind::TalkerFailed);
        let entry = srp.table.entry(slot);
        assert!(entry.reservation_failed);
        assert_eq!(entry.reservation.failure_code, 8);
        assert_eq!(entry.reservation.failure_bridge_id, [0xBB; 8]);

        // A later clean Advertise clears the failure
        let mut clean = [0u8; TALKER_FIRST_VALUE_LEN];
        fv.to_bytes(&mut clean, false);
        assert!(srp.match_talker_advertise(talker, &clean, 0, false, false));
        let entry = srp.table.entry(slot);
        assert!(!entry.reservation_failed);
        assert_eq!(entry.reservation.failure_code, 0);
        assert_eq!(srp.pool.get(talker).kind, AttributeKind::TalkerAdvertise);
    }

    #[test]
    fn test_match_listener_ignores_ignore() {
        let (srp, attrs) = srp_with_listeners(&[0xA000]);
        let fv = ListenerFirstValue { stream_id: StreamId(0xA000) };
        let mut buf = [0u8; LISTENER_FIRST_VALUE_LEN];
        fv.to_bytes(&mut buf);

        assert!(srp.match_listener(attrs[0], &buf, 0, FourPackedEvent::Ready));
        assert!(!srp.match_listener(attrs[0], &buf, 0, FourPackedEvent::Ignore));
        assert!(!srp.match_listener(attrs[0], &buf, 1, FourPackedEvent::Ready));
    }

    #[test]
    fn test_process_new_attribute_creates_slot_and_record() {
        let mut srp: Srp<TestPlatform, 2> = Srp::new(TestPlatform::new());
        let fv = TalkerFirstValue {
            stream_id: StreamId(0xB000),
            dest_mac_addr: MacAddr::from_u48(0x91E0_F000_0001),
            vlan_id: 2,
            tspec_max_frame_size: 200,
            tspec_max_interval: 1,
            tspec: 3 << 5,
            accumulated_latency: 0,
            ..Default::default()
        };
        let mut buf = [0u8; TALKER_FIRST_VALUE_LEN];
        fv.to_bytes(&mut buf, false);

        // Index 2 into the vector names stream 0xB002
        let attr = srp
            .process_new_attribute_from_packet(1, &buf, 2, 0)
            .unwrap();
        let record = srp.pool.get(attr);
        assert_eq!(record.kind, AttributeKind::TalkerAdvertise);
        assert!(!record.here);
        assert_eq!(record.port, 0);

        let slot = record.stream.unwrap();
        assert_eq!(srp.table.entry(slot).reservation.stream_id, StreamId(0xB002));
        assert!(srp.table.entry(slot).talker_present);

        // A listener first value only creates an id-only slot
        let lfv = ListenerFirstValue { stream_id: StreamId(0xC000) };
        let mut lbuf = [0u8; LISTENER_FIRST_VALUE_LEN];
        lfv.to_bytes(&mut lbuf);
        let lattr = srp.process_new_attribute_from_packet(3, &lbuf, 0, 1).unwrap();
        let lslot = srp.pool.get(lattr).stream.unwrap();
        assert!(srp.table.entry(lslot).listener_present);
        assert!(!srp.table.entry(lslot).talker_present);

        // Unknown and Domain types are refused
        assert_eq!(
            srp.process_new_attribute_from_packet(4, &lbuf, 0, 0),
            Err(SrpError::UnsupportedAttribute)
        );
        assert_eq!(
            srp.process_new_attribute_from_packet(9, &lbuf, 0, 0),
            Err(SrpError::UnsupportedAttribute)
        );
    }

    proptest! {
        #[test]
        fn prop_talker_first_value_round_trip(
            stream in any::<u64>(),
            mac in 0u64..(1 << 48),
            vlan in 0u16..4096,
            frame in any::<u16>(),
            interval in any::<u16>(),
            tspec in any::<u8>(),
            latency in any::<u32>(),
        ) {
            let fv = TalkerFirstValue {
                stream_id: StreamId(stream),
                dest_mac_addr: MacAddr::from_u48(mac),
                vlan_id: vlan,
                tspec_max_frame_size: frame,
                tspec_max_interval: interval,
                tspec,
                accumulated_latency: latency,
                ..Default::default()
            };
            let mut buf = [0u8; TALKER_FIRST_VALUE_LEN];
            fv.to_bytes(&mut buf, false);
            prop_assert_eq!(TalkerFirstValue::from_bytes(&buf, false), Some(fv));
        }

        #[test]
        fn prop_four_packed_round_trip(values in proptest::collection::vec(0u8..4, 1..24)) {
            let mut buf = [0u8; 8];
            for (i, v) in values.iter().enumerate() {
                four_packed_set(&mut buf, i, FourPackedEvent::from_value(*v).unwrap());
            }
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(four_packed_get(&buf, i), FourPackedEvent::from_value(*v));
            }
        }
    }
}

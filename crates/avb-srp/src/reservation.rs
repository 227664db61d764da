//! Stream reservation table
//!
//! A fixed-size set of stream entries indexed by StreamID. Entries cache the
//! reservation parameters carried by Talker declarations and track which
//! declarations and per-port bandwidth reservations currently exist.

use crate::config::{MAX_PORTS, STREAM_TABLE_ENTRIES};
use crate::{MacAddr, SrpError, StreamId};

/// Cached parameters of one reserved stream
///
/// Filled from the first Talker declaration (or the host advertise call) and
/// held until the slot is freed. The failure fields are only meaningful after
/// a Talker Failed declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReservationInfo {
    /// Stream identifier
    pub stream_id: StreamId,
    /// Destination MAC address of the stream data frames
    pub dest_mac_addr: MacAddr,
    /// VLAN the stream is tagged with (0 = use the SRP domain VLAN)
    pub vlan_id: u16,
    /// Traffic-spec byte; SR class priority in bits 7..5
    pub tspec: u8,
    /// Maximum stream frame payload in octets
    pub tspec_max_frame_size: u16,
    /// Maximum frames per observation interval
    pub tspec_max_interval: u16,
    /// Accumulated presentation latency in nanoseconds
    pub accumulated_latency: u32,
    /// Bridge that reported the failure (Talker Failed only)
    pub failure_bridge_id: [u8; 8],
    /// MSRP failure code (Talker Failed only)
    pub failure_code: u8,
}

impl ReservationInfo {
    /// SR class priority encoded in the TSpec byte
    pub fn sr_class_priority(&self) -> u8 {
        (self.tspec >> 5) & 7
    }
}

/// One slot of the reservation table
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamEntry {
    /// Cached stream parameters
    pub reservation: ReservationInfo,
    /// A Talker declaration (Advertise or Failed) is registered for this id
    pub talker_present: bool,
    /// A Listener declaration is registered for this id
    pub listener_present: bool,
    /// Bandwidth has been added to the port's shaper and forwarding enabled
    pub bw_reserved: [bool; MAX_PORTS],
    /// The most recent decision for this stream is Asking Failed
    pub reservation_failed: bool,
}

impl StreamEntry {
    fn is_free(&self) -> bool {
        self.reservation.stream_id.is_null()
    }
}

/// Result of looking a StreamID up in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotLookup {
    /// The id is already present at this slot
    Existing(usize),
    /// The id is absent; this free slot may take it
    Free(usize),
    /// The id is absent and no slot is free
    Full,
}

/// The process-wide stream reservation table
#[derive(Debug)]
pub struct ReservationTable {
    entries: [StreamEntry; STREAM_TABLE_ENTRIES],
}

impl ReservationTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            entries: [StreamEntry {
                reservation: ReservationInfo {
                    stream_id: StreamId::NULL,
                    dest_mac_addr: MacAddr([0; 6]),
                    vlan_id: 0,
                    tspec: 0,
                    tspec_max_frame_size: 0,
                    tspec_max_interval: 0,
                    accumulated_latency: 0,
                    failure_bridge_id: [0; 8],
                    failure_code: 0,
                },
                talker_present: false,
                listener_present: false,
                bw_reserved: [false; MAX_PORTS],
                reservation_failed: false,
            }; STREAM_TABLE_ENTRIES],
        }
    }

    /// Linear scan for `stream_id`: the matching slot, else the first free
    /// slot, else [`SlotLookup::Full`]
    pub fn match_by_id(&self, stream_id: StreamId) -> SlotLookup {
        let mut free = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.reservation.stream_id == stream_id && !stream_id.is_null() {
                return SlotLookup::Existing(i);
            }
            if free.is_none() && entry.is_free() {
                free = Some(i);
            }
        }
        match free {
            Some(i) => SlotLookup::Free(i),
            None => SlotLookup::Full,
        }
    }

    /// Slot index of `stream_id` if it is present
    pub fn find(&self, stream_id: StreamId) -> Option<usize> {
        match self.match_by_id(stream_id) {
            SlotLookup::Existing(i) => Some(i),
            _ => None,
        }
    }

    /// Upsert the full reservation body for a Talker declaration.
    ///
    /// Copies everything except the failure fields, which persist until the
    /// slot is freed, and marks the Talker present. Listener state already
    /// accumulated on the slot is preserved.
    pub fn add_full(&mut self, reservation: &ReservationInfo) -> Result<usize, SrpError> {
        let index = match self.match_by_id(reservation.stream_id) {
            SlotLookup::Existing(i) | SlotLookup::Free(i) => i,
            SlotLookup::Full => return Err(SrpError::TableFull),
        };

        let entry = &mut self.entries[index];
        let failure_bridge_id = entry.reservation.failure_bridge_id;
        let failure_code = entry.reservation.failure_code;
        entry.reservation = *reservation;
        entry.reservation.failure_bridge_id = failure_bridge_id;
        entry.reservation.failure_code = failure_code;
        entry.talker_present = true;

        Ok(index)
    }

    /// Upsert a slot for a Listener that arrived before its Talker.
    ///
    /// Only the StreamID is known at this point. If no Talker has filled the
    /// slot yet the reservation body is zeroed first, so stale parameters
    /// from a previous occupant never leak into the new stream.
    pub fn add_id_only(&mut self, stream_id: StreamId) -> Result<usize, SrpError> {
        let index = match self.match_by_id(stream_id) {
            SlotLookup::Existing(i) | SlotLookup::Free(i) => i,
            SlotLookup::Full => return Err(SrpError::TableFull),
        };

        let entry = &mut self.entries[index];
        if !entry.talker_present {
            entry.reservation = ReservationInfo::default();
        }
        entry.reservation.stream_id = stream_id;
        entry.listener_present = true;

        Ok(index)
    }

    /// Zero the slot holding `stream_id`.
    ///
    /// # Panics
    ///
    /// Removing an id that is not stored is an invariant violation: some
    /// attribute held a reference to a slot that no longer exists.
    pub fn remove(&mut self, stream_id: StreamId) {
        match self.match_by_id(stream_id) {
            SlotLookup::Existing(i) => self.entries[i] = StreamEntry::default(),
            _ => panic!("removed a reservation that is not stored"),
        }
    }

    /// The cached reservation for `stream_id`, provided the opposite role is
    /// declared: a listener asks for streams with a Talker present and vice
    /// versa.
    pub fn lookup(&self, stream_id: StreamId, is_listener: bool) -> Option<&ReservationInfo> {
        let index = self.find(stream_id)?;
        let entry = &self.entries[index];
        let present = if is_listener {
            entry.talker_present
        } else {
            entry.listener_present
        };
        present.then(|| &entry.reservation)
    }

    /// Entry accessor
    pub fn entry(&self, index: usize) -> &StreamEntry {
        &self.entries[index]
    }

    /// Mutable entry accessor
    pub fn entry_mut(&mut self, index: usize) -> &mut StreamEntry {
        &mut self.entries[index]
    }

    /// Iterate over occupied slots
    pub fn iter(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter().filter(|e| !e.is_free())
    }
}

impl Default for ReservationTable {
    fn default() -> Self {
        Self::new()
    }
}

//! Stream Reservation Protocol (MSRP, IEEE 802.1Qat) core for AVB endpoints
//!
//! This crate implements the SRP application layer on top of an external MRP
//! attribute-registration engine:
//! - the stream reservation table and per-port bandwidth accounting
//! - the Talker/Listener declaration state machine, including two-port
//!   bridge propagation
//! - MSRP Domain attribute handling and the SR-class VLAN
//! - the MSRP PDU codec with first-value vector merging
//!
//! The MRP timer machinery, the 1722 stream data plane, VLAN registration and
//! the host AVB facade are collaborators reached through the [`DataPath`] and
//! [`AvbApi`] traits and through the MAD request queue drained by the engine.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod attribute;
pub mod bandwidth;
pub mod config;
pub mod domain;
pub mod host;
pub mod pdu;
pub mod reservation;
pub mod srp;

pub use attribute::{Attribute, AttributeKind, AttributePool, MadRequest, PortSel};
pub use pdu::{FourPackedEvent, VectorBuilder};
pub use reservation::{ReservationInfo, ReservationTable, SlotLookup, StreamEntry};
pub use srp::Srp;

/// 64-bit stream identifier: the Talker's MAC address followed by a 16-bit
/// unique id. A zero value marks an empty reservation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamId(pub u64);

impl StreamId {
    /// The empty-slot marker
    pub const NULL: StreamId = StreamId(0);

    /// Build from the two 32-bit halves the host API carries
    pub const fn from_halves(high: u32, low: u32) -> Self {
        StreamId(((high as u64) << 32) | low as u64)
    }

    /// The (high, low) 32-bit halves
    pub const fn halves(self) -> (u32, u32) {
        ((self.0 >> 32) as u32, self.0 as u32)
    }

    /// True for the zero id that marks a free slot
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// 48-bit Ethernet MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create a new MAC address
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// The address as a 48-bit integer, network byte order first
    pub const fn to_u48(self) -> u64 {
        let b = self.0;
        ((b[0] as u64) << 40)
            | ((b[1] as u64) << 32)
            | ((b[2] as u64) << 24)
            | ((b[3] as u64) << 16)
            | ((b[4] as u64) << 8)
            | b[5] as u64
    }

    /// Build from the low 48 bits of an integer
    pub const fn from_u48(value: u64) -> Self {
        Self([
            (value >> 40) as u8,
            (value >> 32) as u8,
            (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ])
    }
}

/// Recoverable SRP errors
///
/// Internal invariant violations (removing an absent reservation, cleaning an
/// attribute with no stream reference) are programming errors and panic
/// instead; the protocol cannot proceed with a torn reservation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SrpError {
    /// No free slot in the stream reservation table
    TableFull,
    /// No free attribute record in the pool
    AttributePoolExhausted,
    /// PDU carried an attribute type this core does not register
    UnsupportedAttribute,
    /// First value too short for its attribute type
    MalformedPdu,
}

/// State of a host media source as exposed by the AVB facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceState {
    /// Not advertised
    #[default]
    Disabled,
    /// Advertised, waiting for a Listener
    Potential,
    /// Reserved end to end and streaming
    Enabled,
}

/// Egress port selection for a source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourcePort {
    /// Transmit out of a single port
    Port(u8),
    /// Transmit out of both ports of a bridge
    Both,
}

/// Calls the core makes toward the switch fabric: the credit-based shaper,
/// the 1722 stream router and VLAN registration.
pub trait DataPath {
    /// Update the shaper for `port` to the new total reserved bandwidth
    fn set_shaper_bandwidth(&mut self, port: u8, bits_per_second: u32);
    /// Open the data-plane forwarding entry for a stream
    fn enable_stream_forwarding(&mut self, stream_id: StreamId);
    /// Close the data-plane forwarding entry for a stream
    fn disable_stream_forwarding(&mut self, stream_id: StreamId);
    /// Drop the stream from the data-plane table entirely
    fn remove_stream(&mut self, stream_id: StreamId);
    /// Direct a source stream's transmit port
    fn set_source_port(&mut self, source: usize, port: SourcePort);
    /// Register VLAN membership for `vlan_id` on `port`
    fn join_vlan(&mut self, vlan_id: u16, port: u8);
}

/// The host's AVB facade: media source/sink bookkeeping the core reads and
/// drives but does not own.
pub trait AvbApi {
    /// Current state of source `source`
    fn source_state(&self, source: usize) -> SourceState;
    /// Move source `source` to `state`
    fn set_source_state(&mut self, source: usize, state: SourceState);
    /// Configured VLAN of a source (0 = follow the SRP domain)
    fn source_vlan(&self, source: usize) -> u16;
    /// Set the VLAN of a source
    fn set_source_vlan(&mut self, source: usize, vlan_id: u16);
    /// Configured VLAN of a sink (0 = follow the SRP domain)
    fn sink_vlan(&self, sink: usize) -> u16;
    /// Set the VLAN of a sink
    fn set_sink_vlan(&mut self, sink: usize, vlan_id: u16);
    /// Index of the local source advertising `stream_id`, if any
    fn source_index(&self, stream_id: StreamId) -> Option<usize>;
    /// Index of the local sink subscribed to `stream_id`, if any
    fn sink_index(&self, stream_id: StreamId) -> Option<usize>;
}

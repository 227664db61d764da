//! Attribute records shared with the MRP engine
//!
//! SRP declarations live in a fixed-capacity arena of attribute records. The
//! records cross-reference reservation slots by index; the MRP engine reads
//! them to drive its applicant machines and drains the MAD request queue to
//! learn about begin/join/leave requests made by this layer.

use heapless::Deque;
use mrp::{ApplicantState, MadPrimitive};

use crate::config::{MAD_QUEUE_DEPTH, MAX_ATTRIBUTES};
use crate::reservation::ReservationTable;
use crate::{SrpError, StreamId};

/// Kind of SRP declaration an attribute record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeKind {
    /// Talker offering a stream along an unbroken reservation path
    TalkerAdvertise,
    /// Talker offering a stream that failed reservation upstream
    TalkerFailed,
    /// Listener asking for a stream
    Listener,
    /// SR class domain announcement
    Domain,
}

impl AttributeKind {
    /// Talker Advertise and Talker Failed form one declaration family
    pub fn is_talker(self) -> bool {
        matches!(self, AttributeKind::TalkerAdvertise | AttributeKind::TalkerFailed)
    }

    /// True for the stream-bound kinds (everything except Domain)
    pub fn is_stream(self) -> bool {
        self != AttributeKind::Domain
    }

    /// MSRP PDU attribute type
    pub fn wire_type(self) -> u8 {
        match self {
            AttributeKind::TalkerAdvertise => 1,
            AttributeKind::TalkerFailed => 2,
            AttributeKind::Listener => 3,
            AttributeKind::Domain => 4,
        }
    }

    /// Decode an MSRP PDU attribute type
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(AttributeKind::TalkerAdvertise),
            2 => Some(AttributeKind::TalkerFailed),
            3 => Some(AttributeKind::Listener),
            4 => Some(AttributeKind::Domain),
            _ => None,
        }
    }
}

/// One attribute record
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Attribute {
    /// Declaration kind
    pub kind: AttributeKind,
    /// Port the declaration is registered on
    pub port: u8,
    /// Declaration originated at this endpoint (host-initiated), not snooped
    pub here: bool,
    /// Created by bridge propagation as the mirror of a peer-port attribute
    pub propagated: bool,
    /// Destroy the record after its next transmission (single-port teardown)
    pub remove_after_next_tx: bool,
    /// Coarse applicant state shared with the MRP engine
    pub applicant: ApplicantState,
    /// Reservation table slot this attribute describes; `None` only for Domain
    pub stream: Option<usize>,
}

impl Attribute {
    const FREE: Attribute = Attribute {
        kind: AttributeKind::Domain,
        port: 0,
        here: false,
        propagated: false,
        remove_after_next_tx: false,
        applicant: ApplicantState::Unused,
        stream: None,
    };
}

/// A MAD service primitive requested for an attribute record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MadRequest {
    /// Index of the attribute in the pool
    pub attr: usize,
    /// Requested primitive
    pub primitive: MadPrimitive,
}

/// Port constraint for the matching queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSel {
    /// Candidate must be on the same port as the probe
    Same,
    /// Candidate must be on the other port
    Opposite,
}

/// Fixed-capacity arena of attribute records plus the MAD request queue
pub struct AttributePool {
    attrs: [Attribute; MAX_ATTRIBUTES],
    requests: Deque<MadRequest, MAD_QUEUE_DEPTH>,
}

impl AttributePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            attrs: [Attribute::FREE; MAX_ATTRIBUTES],
            requests: Deque::new(),
        }
    }

    /// Allocate and initialize a record. Fresh records are dormant until the
    /// engine is asked to begin them.
    pub fn alloc(
        &mut self,
        kind: AttributeKind,
        port: u8,
        here: bool,
        stream: Option<usize>,
    ) -> Result<usize, SrpError> {
        let index = self
            .attrs
            .iter()
            .position(|a| a.applicant.is_unused())
            .ok_or(SrpError::AttributePoolExhausted)?;

        self.attrs[index] = Attribute {
            kind,
            port,
            here,
            propagated: false,
            remove_after_next_tx: false,
            applicant: ApplicantState::Disabled,
            stream,
        };

        Ok(index)
    }

    /// Record accessor
    pub fn get(&self, index: usize) -> &Attribute {
        &self.attrs[index]
    }

    /// Mutable record accessor
    pub fn get_mut(&mut self, index: usize) -> &mut Attribute {
        &mut self.attrs[index]
    }

    /// Request MAD_Begin: the record starts participating
    pub fn mad_begin(&mut self, index: usize) {
        self.attrs[index].applicant = ApplicantState::Observer;
        self.push_request(index, MadPrimitive::Begin);
    }

    /// Request MAD_Join; `new` asks the engine to send a New event
    pub fn mad_join(&mut self, index: usize, new: bool) {
        self.attrs[index].applicant = ApplicantState::Declaring;
        self.push_request(index, MadPrimitive::Join { new });
    }

    /// Request MAD_Leave: the declaration is being withdrawn
    pub fn mad_leave(&mut self, index: usize) {
        self.attrs[index].applicant = ApplicantState::Leaving;
        self.push_request(index, MadPrimitive::Leave);
    }

    /// Force the applicant state, bypassing the engine (used to kill
    /// attributes that must not transmit a Leave)
    pub fn set_applicant(&mut self, index: usize, state: ApplicantState) {
        self.attrs[index].applicant = state;
    }

    /// Next MAD request for the engine, in request order
    pub fn pop_request(&mut self) -> Option<MadRequest> {
        self.requests.pop_front()
    }

    fn push_request(&mut self, attr: usize, primitive: MadPrimitive) {
        // The engine drains between indications; the depth covers one PDU's
        // worth of cascaded requests.
        let ok = self.requests.push_back(MadRequest { attr, primitive }).is_ok();
        debug_assert!(ok, "MAD request queue overflow");
    }

    /// Indices of all records that currently hold a registration
    pub fn iter_live(&self) -> impl Iterator<Item = usize> + '_ {
        self.attrs
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.applicant.is_unused())
            .map(|(i, _)| i)
    }

    fn candidate_live(&self, index: usize, dormant_ok: bool) -> bool {
        let state = self.attrs[index].applicant;
        !state.is_unused() && (dormant_ok || !state.is_dormant())
    }

    fn port_matches(&self, probe: usize, index: usize, sel: PortSel) -> bool {
        let same = self.attrs[probe].port == self.attrs[index].port;
        match sel {
            PortSel::Same => same,
            PortSel::Opposite => !same,
        }
    }

    /// Peer attribute of the opposite declaration kind (Talker for a
    /// Listener probe and vice versa) bound to the same stream slot.
    ///
    /// `dormant_ok` also matches records that were allocated but never begun;
    /// the cleanup sweep uses this to see every remaining reference to a
    /// slot, while the propagation rules only consider active declarations.
    pub fn pair(&self, probe: usize, sel: PortSel, dormant_ok: bool) -> Option<usize> {
        let probe_attr = &self.attrs[probe];
        let stream = probe_attr.stream?;
        (0..MAX_ATTRIBUTES).find(|&i| {
            let a = &self.attrs[i];
            a.kind.is_stream()
                && a.kind.is_talker() != probe_attr.kind.is_talker()
                && a.stream == Some(stream)
                && self.candidate_live(i, dormant_ok)
                && self.port_matches(probe, i, sel)
        })
    }

    /// Peer attribute of the same declaration kind bound to the same stream
    /// slot, on the selected port.
    ///
    /// The probe itself is a valid match when `sel` is [`PortSel::Same`]; the
    /// cleanup sweep relies on this to keep a slot alive while its last
    /// active attribute is still registered.
    pub fn same_kind(&self, probe: usize, sel: PortSel, dormant_ok: bool) -> Option<usize> {
        let probe_attr = &self.attrs[probe];
        let stream = probe_attr.stream?;
        (0..MAX_ATTRIBUTES).find(|&i| {
            let a = &self.attrs[i];
            a.kind == probe_attr.kind
                && a.stream == Some(stream)
                && self.candidate_live(i, dormant_ok)
                && self.port_matches(probe, i, sel)
        })
    }

    /// Non-propagated attribute of `kind` for `stream_id`, optionally
    /// constrained to one port.
    pub fn find_non_propagated(
        &self,
        table: &ReservationTable,
        kind: AttributeKind,
        stream_id: StreamId,
        port: Option<u8>,
    ) -> Option<usize> {
        (0..MAX_ATTRIBUTES).find(|&i| {
            let a = &self.attrs[i];
            a.kind == kind
                && !a.propagated
                && self.candidate_live(i, true)
                && port.map_or(true, |p| a.port == p)
                && a.stream.map_or(false, |s| {
                    table.entry(s).reservation.stream_id == stream_id
                })
        })
    }
}

impl Default for AttributePool {
    fn default() -> Self {
        Self::new()
    }
}

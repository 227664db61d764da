//! SRP context and the Talker/Listener declaration state machine
//!
//! All SRP state lives in one explicitly constructed [`Srp`] context: the
//! reservation table, the attribute pool, per-port bandwidth totals and the
//! domain state. The MRP engine feeds join/leave indications in; the machine
//! updates the table, adjusts bandwidth, drives the data plane and requests
//! MAD primitives back through the pool's queue.
//!
//! `PORTS` selects endpoint mode (1) or two-port bridge mode (2). In bridge
//! mode a declaration registered on one port is mirrored onto the other
//! ("propagated"), carrying the reservation across the bridge.

use mrp::ApplicantState;

use crate::attribute::{AttributeKind, AttributePool, PortSel};
use crate::bandwidth::PortBandwidth;
use crate::config::MAX_PORTS;
use crate::domain::DomainState;
use crate::pdu::FourPackedEvent;
use crate::reservation::ReservationTable;
use crate::{AvbApi, DataPath, SourcePort, SourceState, SrpError, StreamId};

/// The SRP core: reservation state plus its collaborators
pub struct Srp<P, const PORTS: usize> {
    pub(crate) platform: P,
    pub(crate) table: ReservationTable,
    pub(crate) pool: AttributePool,
    pub(crate) bandwidth: PortBandwidth,
    pub(crate) domain: DomainState,
}

impl<P: DataPath + AvbApi, const PORTS: usize> Srp<P, PORTS> {
    /// Create the context and allocate the per-port Domain attributes
    pub fn new(platform: P) -> Self {
        assert!(PORTS >= 1 && PORTS <= MAX_PORTS);

        let mut srp = Self {
            platform,
            table: ReservationTable::new(),
            pool: AttributePool::new(),
            bandwidth: PortBandwidth::new(),
            domain: DomainState::new(),
        };
        match srp.domain_init() {
            Ok(()) => srp,
            // A fresh pool always has room for the Domain attributes
            Err(_) => unreachable!(),
        }
    }

    /// The collaborator implementation
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable access to the collaborator implementation
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The reservation table
    pub fn table(&self) -> &ReservationTable {
        &self.table
    }

    /// The attribute pool (the MRP engine's view of our declarations)
    pub fn pool(&self) -> &AttributePool {
        &self.pool
    }

    /// Mutable pool access; the engine uses this to drain MAD requests
    pub fn pool_mut(&mut self) -> &mut AttributePool {
        &mut self.pool
    }

    /// Per-port reserved bandwidth totals
    pub fn bandwidth(&self) -> &PortBandwidth {
        &self.bandwidth
    }

    /// Domain state: boundary flags and the SR-class VLAN
    pub fn domain(&self) -> &DomainState {
        &self.domain
    }

    /// Mutable domain state access
    pub fn domain_mut(&mut self) -> &mut DomainState {
        &mut self.domain
    }

    /// Reservation slot and StreamID behind a stream-bound attribute.
    ///
    /// # Panics
    ///
    /// A Talker or Listener attribute without a slot reference is orphaned;
    /// the table can no longer be trusted.
    pub(crate) fn stream_slot(&self, attr: usize) -> (usize, StreamId) {
        match self.pool.get(attr).stream {
            Some(slot) => (slot, self.table.entry(slot).reservation.stream_id),
            None => panic!("stream attribute without a reservation slot"),
        }
    }

    fn frame_size(&self, slot: usize) -> u16 {
        self.table.entry(slot).reservation.tspec_max_frame_size
    }

    /// Mirror `attr` onto the opposite port and declare it there
    fn propagate_and_join(&mut self, attr: usize, new: bool) -> Result<(), SrpError> {
        let source = *self.pool.get(attr);
        let mirror = self
            .pool
            .alloc(source.kind, source.port ^ 1, false, source.stream)?;
        self.pool.mad_begin(mirror);
        self.pool.mad_join(mirror, new);
        self.pool.get_mut(mirror).propagated = true;
        Ok(())
    }

    /// Bridge MAP join: propagate a registration across the two ports.
    ///
    /// Talkers always mirror onto the opposite port when no same-kind
    /// attribute exists there. Listeners mirror only toward a Talker that was
    /// itself learned from the wire (neither local nor propagated); in that
    /// case the relay path also reserves bandwidth on the Listener's port and
    /// opens data-plane forwarding.
    pub(crate) fn map_join(
        &mut self,
        attr: usize,
        new: bool,
        is_listener: bool,
    ) -> Result<(), SrpError> {
        let pair_opposite = self.pool.pair(attr, PortSel::Opposite, false);
        let same_kind_opposite = self.pool.same_kind(attr, PortSel::Opposite, false);

        if same_kind_opposite.is_none() {
            let propagate = if !is_listener {
                true
            } else {
                pair_opposite.map_or(false, |t| {
                    let talker = self.pool.get(t);
                    !talker.propagated && !talker.here
                })
            };
            if propagate {
                self.propagate_and_join(attr, new)?;
            }
        }

        if is_listener {
            let talker_is_remote = pair_opposite.map_or(false, |t| {
                let talker = self.pool.get(t);
                !talker.propagated && !talker.here
            });
            if talker_is_remote {
                let (slot, stream_id) = self.stream_slot(attr);
                let port = self.pool.get(attr).port;
                if !self.table.entry(slot).bw_reserved[port as usize] {
                    self.table.entry_mut(slot).bw_reserved[port as usize] = true;
                    let frame_size = self.frame_size(slot);
                    self.bandwidth
                        .increase(&mut self.platform, port, frame_size, true);
                    self.platform.enable_stream_forwarding(stream_id);
                }
                if let Some(listener_opposite) = same_kind_opposite {
                    self.pool.mad_join(listener_opposite, true);
                    self.pool.get_mut(listener_opposite).propagated = true;
                }
            }
        } else if let Some(talker_opposite) = same_kind_opposite {
            self.pool.mad_join(talker_opposite, true);
            self.pool.get_mut(talker_opposite).propagated = true;
        }

        Ok(())
    }

    /// Bridge MAP leave: withdraw a registration from the opposite port and
    /// release whatever the stream reserved.
    pub(crate) fn map_leave(&mut self, attr: usize) {
        let pair_opposite = self.pool.pair(attr, PortSel::Opposite, false);
        let same_kind_opposite = self.pool.same_kind(attr, PortSel::Opposite, false);

        match self.pool.get(attr).kind {
            AttributeKind::Listener => {
                let (slot, stream_id) = self.stream_slot(attr);
                let port = self.pool.get(attr).port;
                let talker_is_remote =
                    pair_opposite.map_or(false, |t| !self.pool.get(t).here);

                if let Some(listener_opposite) = same_kind_opposite {
                    if talker_is_remote && self.table.entry(slot).bw_reserved[port as usize] {
                        let frame_size = self.frame_size(slot);
                        self.bandwidth
                            .decrease(&mut self.platform, port, frame_size, true);
                        self.platform.disable_stream_forwarding(stream_id);
                        self.table.entry_mut(slot).bw_reserved[port as usize] = false;

                        // Withdraw the mirror only if nothing local still
                        // listens through it
                        let mirror = self.pool.get(listener_opposite);
                        if mirror.propagated && !mirror.here {
                            self.pool.mad_leave(listener_opposite);
                        }

                        // The dead registration must never transmit a Leave
                        // of its own
                        self.pool.set_applicant(attr, ApplicantState::Unused);
                    }
                }
            }
            AttributeKind::TalkerAdvertise | AttributeKind::TalkerFailed => {
                let (slot, stream_id) = self.stream_slot(attr);
                let frame_size = self.frame_size(slot);
                let mut released = false;
                for port in 0..PORTS {
                    if self.table.entry(slot).bw_reserved[port] {
                        self.bandwidth
                            .decrease(&mut self.platform, port as u8, frame_size, true);
                        self.table.entry_mut(slot).bw_reserved[port] = false;
                        released = true;
                    }
                }
                if released {
                    self.platform.disable_stream_forwarding(stream_id);
                }

                if let Some(talker_opposite) = same_kind_opposite {
                    self.pool.mad_leave(talker_opposite);
                }

                /* 802.1Qat 25.3.4.4.1: with the Talker gone, act as a proxy
                   for the Listeners on this port and send a Leave back toward
                   the Talker. */
                if let Some(listener_this) = self.pool.pair(attr, PortSel::Same, false) {
                    self.pool.mad_leave(listener_this);
                }
            }
            AttributeKind::Domain => {}
        }
    }

    /// A Talker registration (Advertise or Failed) was joined on a port.
    ///
    /// Bridge mode only: when a host Listener for this stream already waits
    /// on this port, retire its dormant stub on the other port and declare
    /// it, then run bridge propagation.
    pub fn talker_join_ind(&mut self, attr: usize, new: bool) -> Result<(), SrpError> {
        if PORTS != 2 {
            return Ok(());
        }

        let (_slot, stream_id) = self.stream_slot(attr);
        let listener_this = self.pool.pair(attr, PortSel::Same, true);

        if let Some(listener_this) = listener_this {
            if self.platform.sink_index(stream_id).is_some() && self.pool.get(listener_this).here {
                if let Some(listener_opposite) = self.pool.pair(attr, PortSel::Opposite, true) {
                    self.pool
                        .set_applicant(listener_opposite, ApplicantState::Unused);
                }
                self.pool.mad_begin(listener_this);
                self.pool.mad_join(listener_this, true);
            }
        }

        self.map_join(attr, new, false)
    }

    /// A Talker registration left.
    ///
    /// Endpoint mode simply forgets the Talker on the slot; bridge mode runs
    /// MAP leave unless the stream is one of our own sinks.
    pub fn talker_leave_ind(&mut self, attr: usize) {
        if PORTS == 2 {
            let (_slot, stream_id) = self.stream_slot(attr);
            if self.platform.sink_index(stream_id).is_none() {
                self.map_leave(attr);
            }
        } else {
            let (slot, _) = self.stream_slot(attr);
            self.table.entry_mut(slot).talker_present = false;
        }
    }

    /// A Listener registration was joined on a port.
    ///
    /// Runs bridge propagation first, then couples the registration to a
    /// local source if the stream is ours: reserve bandwidth toward the
    /// Listener, point the source at the right port (or both) and enable the
    /// stream once the Listener declared Ready.
    pub fn listener_join_ind(
        &mut self,
        attr: usize,
        new: bool,
        event: FourPackedEvent,
    ) -> Result<(), SrpError> {
        let (slot, stream_id) = self.stream_slot(attr);

        if PORTS == 2 {
            self.map_join(attr, new, true)?;
        }

        let Some(source) = self.platform.source_index(stream_id) else {
            return Ok(());
        };
        let state = self.platform.source_state(source);
        let port = self.pool.get(attr).port;
        let mut enable_stream = false;

        let listener_opposite = self.pool.same_kind(attr, PortSel::Opposite, false);
        if PORTS == 2 && listener_opposite.is_some() {
            // Listeners ready on both ports: transmit out of both
            let other = (port ^ 1) as usize;
            if self.table.entry(slot).bw_reserved[other]
                && !self.table.entry(slot).bw_reserved[port as usize]
            {
                let frame_size = self.frame_size(slot);
                self.bandwidth
                    .increase(&mut self.platform, port, frame_size, false);
                self.platform.set_source_port(source, SourcePort::Both);
                self.table.entry_mut(slot).bw_reserved[port as usize] = true;
                enable_stream = true;
            }
        } else if self
            .pool
            .find_non_propagated(
                &self.table,
                AttributeKind::TalkerAdvertise,
                stream_id,
                Some(port),
            )
            .is_some()
        {
            // Delivery out of this port only
            if !self.table.entry(slot).bw_reserved[port as usize] {
                let frame_size = self.frame_size(slot);
                self.bandwidth
                    .increase(&mut self.platform, port, frame_size, false);
                self.table.entry_mut(slot).bw_reserved[port as usize] = true;
            }
            self.platform.set_source_port(source, SourcePort::Port(port));
            enable_stream = true;
        }

        if enable_stream
            && state == SourceState::Potential
            && matches!(event, FourPackedEvent::Ready | FourPackedEvent::ReadyFailed)
        {
            self.platform.set_source_state(source, SourceState::Enabled);
        }

        Ok(())
    }

    /// A Listener registration left
    pub fn listener_leave_ind(&mut self, attr: usize) {
        let (slot, stream_id) = self.stream_slot(attr);
        let source = self.platform.source_index(stream_id);
        let listener_opposite = self.pool.same_kind(attr, PortSel::Opposite, false);
        let port = self.pool.get(attr).port;

        if PORTS == 2 {
            self.map_leave(attr);
        }

        let Some(source) = source else {
            return;
        };

        if self.table.entry(slot).bw_reserved[port as usize] {
            let frame_size = self.frame_size(slot);
            self.bandwidth
                .decrease(&mut self.platform, port, frame_size, false);
            if listener_opposite.is_some() {
                // The opposite port still listens; keep transmitting there
                self.platform
                    .set_source_port(source, SourcePort::Port(port ^ 1));
            }
            self.table.entry_mut(slot).bw_reserved[port as usize] = false;
        }

        let state = self.platform.source_state(source);
        if state == SourceState::Enabled && listener_opposite.is_none() {
            self.platform.set_source_state(source, SourceState::Potential);
            // The release above already ran; a second one is unreachable
            debug_assert!(!self.table.entry(slot).bw_reserved[port as usize]);
        }
    }

    /// Deferred attribute destruction, invoked by the MRP engine for each
    /// attribute on each tick that carried an event.
    ///
    /// Returns true when the record has reached `Unused` and may be reused.
    /// Once no attribute of either kind on either port still references a
    /// stream, its data-plane entry and reservation slot are torn down.
    pub fn cleanup(&mut self, attr: usize) -> bool {
        let record = *self.pool.get(attr);

        let make_unused = if PORTS == 2 {
            record.kind == AttributeKind::Listener || !record.here
        } else {
            !record.here && record.kind != AttributeKind::Domain
        };
        if make_unused {
            self.pool.set_applicant(attr, ApplicantState::Unused);
        }

        if record.kind.is_stream() {
            let remaining = self
                .pool
                .pair(attr, PortSel::Opposite, true)
                .or_else(|| self.pool.pair(attr, PortSel::Same, true))
                .or_else(|| self.pool.same_kind(attr, PortSel::Opposite, true))
                .or_else(|| self.pool.same_kind(attr, PortSel::Same, true));

            if remaining.is_none() {
                let (_slot, stream_id) = self.stream_slot(attr);
                // A null id means another attribute of this stream already
                // tore the slot down
                if !stream_id.is_null() {
                    self.platform.remove_stream(stream_id);
                    self.table.remove(stream_id);
                }
            }
        }

        self.pool.get(attr).applicant.is_unused()
    }

    /// Transmit ordering for Talker attributes: by the local source index,
    /// snooped streams last
    pub fn compare_talker_attributes(&self, a: usize, b: usize) -> bool {
        let local_id = |attr: usize| {
            let (_, stream_id) = self.stream_slot(attr);
            self.platform.source_index(stream_id).unwrap_or(usize::MAX)
        };
        local_id(a) < local_id(b)
    }

    /// Transmit ordering for Listener attributes: by StreamID ascending
    pub fn compare_listener_attributes(&self, a: usize, b: usize) -> bool {
        self.stream_slot(a).1 < self.stream_slot(b).1
    }
}

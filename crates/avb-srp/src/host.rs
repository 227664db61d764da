//! Host-initiated SRP operations
//!
//! The endpoint application drives reservations through four entry points:
//! advertise a Talker, join as a Listener, and the matching leaves. These run
//! between PDU events, never concurrently with them.

use crate::attribute::{AttributeKind, PortSel};
use crate::reservation::ReservationInfo;
use crate::srp::Srp;
use crate::{AvbApi, DataPath, SrpError, StreamId};

impl<P: DataPath + AvbApi, const PORTS: usize> Srp<P, PORTS> {
    /// Create the reservation and declare a Talker Advertise on every port.
    ///
    /// A zero `vlan_id` adopts the SRP domain VLAN. The VLAN is also joined
    /// on every port. Endpoint mode additionally parks a dormant local
    /// Listener attribute so an incoming Listener declaration has something
    /// to match against. Returns the VLAN actually joined.
    pub fn create_and_join_talker_advertise(
        &mut self,
        reservation: &ReservationInfo,
    ) -> Result<u16, SrpError> {
        let slot = self.table.add_full(reservation)?;
        if self.table.entry(slot).reservation.vlan_id == 0 {
            self.table.entry_mut(slot).reservation.vlan_id = self.domain.vlan_id;
        }
        let vlan_id = self.table.entry(slot).reservation.vlan_id;
        let stream_id = reservation.stream_id;

        for port in 0..PORTS as u8 {
            let talker = self
                .pool
                .find_non_propagated(&self.table, AttributeKind::TalkerAdvertise, stream_id, Some(port))
                .or_else(|| {
                    self.pool.find_non_propagated(
                        &self.table,
                        AttributeKind::TalkerFailed,
                        stream_id,
                        Some(port),
                    )
                });

            self.platform.join_vlan(vlan_id, port);

            match talker {
                Some(talker) => self.pool.mad_join(talker, true),
                None => {
                    let talker =
                        self.pool
                            .alloc(AttributeKind::TalkerAdvertise, port, true, Some(slot))?;
                    self.pool.mad_begin(talker);
                    self.pool.mad_join(talker, true);
                }
            }

            if PORTS == 1
                && self
                    .pool
                    .find_non_propagated(&self.table, AttributeKind::Listener, stream_id, Some(port))
                    .is_none()
            {
                let listener = self.pool.alloc(AttributeKind::Listener, port, false, Some(slot))?;
                self.pool.mad_begin(listener);
            }
        }

        Ok(vlan_id)
    }

    /// Join as a Listener for `stream_id`.
    ///
    /// With the Talker already registered, the Listener is declared on the
    /// Talker's port. Before the Talker arrives, Listener attributes are
    /// parked on every port: endpoint mode declares them immediately, bridge
    /// mode leaves them dormant until the Talker registration shows up.
    /// Returns the VLAN joined.
    pub fn join_listener(&mut self, stream_id: StreamId, vlan_id: u16) -> Result<u16, SrpError> {
        let advertise = self.pool.find_non_propagated(
            &self.table,
            AttributeKind::TalkerAdvertise,
            stream_id,
            None,
        );
        let failed =
            self.pool
                .find_non_propagated(&self.table, AttributeKind::TalkerFailed, stream_id, None);

        let vid = if vlan_id == 0 { self.domain.vlan_id } else { vlan_id };

        if let Some(talker) = advertise {
            let mut listener = self.pool.pair(talker, PortSel::Same, false);

            if listener.is_none() {
                let port = self.pool.get(talker).port;
                let stream = self.pool.get(talker).stream;
                self.platform.join_vlan(vid, port);
                let fresh = self.pool.alloc(AttributeKind::Listener, port, true, stream)?;
                self.pool.mad_begin(fresh);
                listener = Some(fresh);
            }

            if let Some(listener) = listener {
                self.platform.join_vlan(vid, self.pool.get(listener).port);
                if PORTS == 2 {
                    /* Attaching to a stream that may already be relayed for a
                       downstream Listener: mark the attribute as ours so our
                       own disconnect does not silently withdraw it. */
                    self.pool.get_mut(listener).here = true;
                }
                self.pool.mad_join(listener, true);
            }
        } else if failed.is_none() {
            // The Talker probably has not arrived yet
            let slot = self.table.add_id_only(stream_id)?;

            for port in 0..PORTS as u8 {
                let existing = self.pool.find_non_propagated(
                    &self.table,
                    AttributeKind::Listener,
                    stream_id,
                    Some(port),
                );
                self.platform.join_vlan(vid, port);

                match existing {
                    None => {
                        let listener =
                            self.pool.alloc(AttributeKind::Listener, port, true, Some(slot))?;
                        if PORTS == 1 {
                            self.pool.mad_begin(listener);
                            self.pool.mad_join(listener, true);
                        }
                    }
                    Some(listener) => {
                        if PORTS == 1 {
                            self.pool.mad_join(listener, true);
                        }
                    }
                }

                if PORTS == 1 {
                    // A dormant Talker stub gives the incoming Advertise a
                    // first-value match to land on
                    let talker =
                        self.pool
                            .alloc(AttributeKind::TalkerAdvertise, port, false, Some(slot))?;
                    self.pool.mad_begin(talker);
                }
            }
        }

        Ok(vid)
    }

    /// Withdraw the Talker declaration for `stream_id` on every port.
    /// Endpoint mode also withdraws the paired local Listener stub.
    pub fn leave_talker(&mut self, stream_id: StreamId) {
        for port in 0..PORTS as u8 {
            let talker = self
                .pool
                .find_non_propagated(&self.table, AttributeKind::TalkerAdvertise, stream_id, Some(port))
                .or_else(|| {
                    self.pool.find_non_propagated(
                        &self.table,
                        AttributeKind::TalkerFailed,
                        stream_id,
                        Some(port),
                    )
                });
            if let Some(talker) = talker {
                self.pool.mad_leave(talker);
            }

            if PORTS == 1 {
                if let Some(listener) = self.pool.find_non_propagated(
                    &self.table,
                    AttributeKind::Listener,
                    stream_id,
                    Some(0),
                ) {
                    self.pool.get_mut(listener).here = false;
                    self.pool.mad_leave(listener);
                }
            }
        }
    }

    /// Withdraw our Listener interest in `stream_id`.
    ///
    /// On a bridge, a non-propagated Listener on the opposite port means
    /// another endpoint downstream still listens: the registration stays, but
    /// our claim on it is dropped so a later downstream leave propagates.
    pub fn leave_listener(&mut self, stream_id: StreamId) {
        if PORTS == 2 {
            let talker = self
                .pool
                .find_non_propagated(&self.table, AttributeKind::TalkerAdvertise, stream_id, None)
                .or_else(|| {
                    self.pool.find_non_propagated(
                        &self.table,
                        AttributeKind::TalkerFailed,
                        stream_id,
                        None,
                    )
                });

            let Some(talker) = talker else { return };
            let listener_opposite = self.pool.pair(talker, PortSel::Opposite, false);
            let listener_this = self.pool.pair(talker, PortSel::Same, false);

            if listener_opposite.is_some() {
                if let Some(listener_this) = listener_this {
                    self.pool.get_mut(listener_this).here = false;
                }
            } else if let Some(listener_this) = listener_this {
                self.pool.get_mut(listener_this).here = false;
                self.pool.mad_leave(listener_this);
            }
        } else {
            if let Some(listener) = self.pool.find_non_propagated(
                &self.table,
                AttributeKind::Listener,
                stream_id,
                Some(0),
            ) {
                self.pool.get_mut(listener).here = false;
                self.pool.mad_leave(listener);
            }

            let talker = self
                .pool
                .find_non_propagated(&self.table, AttributeKind::TalkerAdvertise, stream_id, Some(0))
                .or_else(|| {
                    self.pool.find_non_propagated(
                        &self.table,
                        AttributeKind::TalkerFailed,
                        stream_id,
                        Some(0),
                    )
                });
            if let Some(talker) = talker {
                let talker = self.pool.get_mut(talker);
                talker.here = false;
                talker.remove_after_next_tx = true;
            }
        }
    }

    /// The cached reservation for `stream_id`, provided the opposite role is
    /// declared for it
    pub fn lookup_reservation(
        &self,
        stream_id: StreamId,
        is_listener: bool,
    ) -> Option<&ReservationInfo> {
        self.table.lookup(stream_id, is_listener)
    }
}

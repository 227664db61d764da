//! MSRP Domain attribute handling
//!
//! Each port advertises a Domain attribute naming the SR class and its VLAN.
//! Until a peer's Domain registration arrives a port sits at the SR domain
//! boundary, and Listener declarations sent over it must signal Asking
//! Failed. The SR-class VLAN learned from the domain replaces any source or
//! sink VLAN configured as 0.

use crate::attribute::AttributeKind;
use crate::config::{DEFAULT_VLAN, MAX_PORTS, NUM_SINKS, NUM_SOURCES, SRCLASS_DEFAULT, TSPEC_PRIORITY_DEFAULT};
use crate::pdu::DomainFirstValue;
use crate::srp::Srp;
use crate::{AvbApi, DataPath, SrpError};

/// Domain-derived state shared by the codec and the declaration machine
#[derive(Debug)]
pub struct DomainState {
    /// Per-port SR domain boundary flag; set until the peer joins the domain
    pub boundary_port: [bool; MAX_PORTS],
    /// SR-class VLAN currently in force
    pub vlan_id: u16,
    /// Domain attribute record per port
    pub(crate) attrs: [Option<usize>; MAX_PORTS],
}

impl DomainState {
    pub(crate) fn new() -> Self {
        Self {
            boundary_port: [true; MAX_PORTS],
            vlan_id: DEFAULT_VLAN,
            attrs: [None; MAX_PORTS],
        }
    }
}

impl<P: DataPath + AvbApi, const PORTS: usize> Srp<P, PORTS> {
    /// Allocate the per-port Domain attributes and raise every boundary flag.
    /// Called once from [`Srp::new`].
    pub(crate) fn domain_init(&mut self) -> Result<(), SrpError> {
        for port in 0..PORTS {
            let attr = self.pool.alloc(AttributeKind::Domain, port as u8, true, None)?;
            self.domain.attrs[port] = Some(attr);
            self.domain.boundary_port[port] = true;
        }
        self.domain.vlan_id = DEFAULT_VLAN;
        Ok(())
    }

    /// Begin and declare the Domain attribute on every port
    pub fn domain_join(&mut self) {
        for port in 0..PORTS {
            if let Some(attr) = self.domain.attrs[port] {
                self.pool.mad_begin(attr);
                self.pool.mad_join(attr, true);
            }
        }
    }

    /// A peer joined the SR domain on `port`: the port is no longer a domain
    /// boundary, and sources/sinks configured to follow the domain adopt the
    /// domain VLAN.
    pub fn domain_join_ind(&mut self, port: u8) {
        self.domain.boundary_port[port as usize] = false;

        for source in 0..NUM_SOURCES {
            if self.platform.source_vlan(source) == 0 {
                self.platform.set_source_vlan(source, self.domain.vlan_id);
            }
        }
        for sink in 0..NUM_SINKS {
            if self.platform.sink_vlan(sink) == 0 {
                self.platform.set_sink_vlan(sink, self.domain.vlan_id);
            }
        }
    }

    /// The peer's Domain registration on `port` aged out; the port is a
    /// domain boundary again.
    pub fn domain_leave_ind(&mut self, port: u8) {
        self.domain.boundary_port[port as usize] = true;
    }

    /// Match an incoming Domain first value at `index` within its vector.
    ///
    /// When the announced class and priority are the defaults the announced
    /// VLAN silently becomes the SR-class VLAN.
    pub fn match_domain(&mut self, first_value: &[u8], index: u16) -> bool {
        let Some(fv) = DomainFirstValue::from_bytes(first_value) else {
            return false;
        };

        let sr_class_id = fv.sr_class_id.wrapping_add(index as u8);
        let sr_class_priority = fv.sr_class_priority.wrapping_add(index as u8);

        if sr_class_id == SRCLASS_DEFAULT && sr_class_priority == TSPEC_PRIORITY_DEFAULT {
            self.domain.vlan_id = fv.sr_class_vid;
            return true;
        }

        false
    }
}

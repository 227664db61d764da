//! Multiple Registration Protocol (IEEE 802.1ak) primitives
//!
//! This crate carries the pieces of MRP that an application protocol such as
//! MSRP shares with the MRP timer/state-machine engine:
//! - PDU message and vector headers
//! - the three-packed attribute event codec
//! - the applicant state values visible at the application boundary
//! - MAD (MRP Attribute Declaration) service primitives

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod events;
pub mod pdu;

pub use events::AttributeEvent;
pub use pdu::{MsgHeader, VectorHeader};

/// Applicant state of an attribute, as seen at the application boundary.
///
/// The full 802.1ak applicant machine (VO..LO) lives in the MRP engine; the
/// application layer only distinguishes the coarse states that drive
/// attribute lifetime and transmit eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApplicantState {
    /// Record is free and may be reused
    #[default]
    Unused,
    /// Allocated but dormant: initialized, never begun
    Disabled,
    /// Participating without declaring (after a MAD begin)
    Observer,
    /// Declaring the attribute (after a MAD join)
    Declaring,
    /// Withdrawing the declaration (after a MAD leave)
    Leaving,
}

impl ApplicantState {
    /// A record in this state holds no registration at all.
    pub fn is_unused(self) -> bool {
        self == ApplicantState::Unused
    }

    /// A record in this state exists but takes no part in matching
    /// until it is begun.
    pub fn is_dormant(self) -> bool {
        self == ApplicantState::Disabled
    }
}

/// MAD service primitives requested of the MRP engine.
///
/// The application layer records these against an attribute; the engine
/// drains them to schedule PDU emission and drive its applicant machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MadPrimitive {
    /// MAD_Begin: start participating in the protocol for this attribute
    Begin,
    /// MAD_Join: declare the attribute; `new` requests a New event rather
    /// than a JoinIn
    Join {
        /// Request a New rather than JoinIn encoding
        new: bool,
    },
    /// MAD_Leave: withdraw the declaration
    Leave,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_is_not_dormant() {
        assert!(ApplicantState::Unused.is_unused());
        assert!(!ApplicantState::Unused.is_dormant());
        assert!(ApplicantState::Disabled.is_dormant());
        assert!(!ApplicantState::Declaring.is_dormant());
    }
}

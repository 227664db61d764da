//! Build-time SRP configuration

/// Maximum number of switch ports the tables are sized for. The active port
/// count is the `PORTS` parameter of [`crate::Srp`] (1 = endpoint, 2 = bridge).
pub const MAX_PORTS: usize = 2;

/// Number of media sources the host AVB facade exposes
pub const NUM_SOURCES: usize = 4;

/// Number of media sinks the host AVB facade exposes
pub const NUM_SINKS: usize = 4;

/// Default SR-class VLAN adopted until a Domain attribute overrides it
pub const DEFAULT_VLAN: u16 = 2;

/// Class A observation interval: frames per second per interval unit
pub const PACKET_RATE: u32 = 8000;

/// SR class identifier carried in Domain attributes (6 = Class A)
pub const SRCLASS_DEFAULT: u8 = 6;

/// SR class priority carried in Domain attributes and Talker TSpecs
pub const TSPEC_PRIORITY_DEFAULT: u8 = 3;

/* The table holds more slots than the stream maximum because SRP cannot age
   attributes out as quickly as the host can tear a connection down and set it
   up again. The slack absorbs the window until the cleanup sweep runs, with
   extra headroom for relayed streams in two-port builds. */

/// Stream reservation table capacity
pub const STREAM_TABLE_ENTRIES: usize = 8 + NUM_SOURCES + NUM_SINKS + 4;

/// Attribute record pool capacity: Talker and Listener per port per stream,
/// plus one Domain attribute per port
pub const MAX_ATTRIBUTES: usize = 4 * STREAM_TABLE_ENTRIES + MAX_PORTS;

/// Depth of the MAD request queue the MRP engine drains between indications
pub const MAD_QUEUE_DEPTH: usize = 32;

//! Per-stream bandwidth computation and per-port totals
//!
//! The accountant never infers state from the reservation table; the
//! declaration state machine invokes it exactly when a per-port
//! `bw_reserved` flag flips, and the shaper is told the new total.

use crate::config::{MAX_PORTS, PACKET_RATE};
use crate::DataPath;

const INTERFRAME_GAP: u32 = 12;
const PREAMBLE_SFD: u32 = 8;
const ETH_HEADER_AND_TAG: u32 = 18;
const CRC: u32 = 4;

/// Ethernet bandwidth of one stream in bits per second.
///
/// `extra_byte` accounts for the additional octet reserved on received
/// frames: false for Talker-source accounting, true for Listener/relay
/// accounting.
pub fn stream_bandwidth_bps(max_frame_size: u16, extra_byte: bool) -> u32 {
    let total_frame_size = INTERFRAME_GAP
        + PREAMBLE_SFD
        + ETH_HEADER_AND_TAG
        + max_frame_size as u32
        + CRC
        + extra_byte as u32;

    total_frame_size * 8 * PACKET_RATE
}

/// Reserved bandwidth totals per port
#[derive(Debug, Default)]
pub struct PortBandwidth {
    bits_per_second: [u32; MAX_PORTS],
}

impl PortBandwidth {
    /// All ports at zero
    pub const fn new() -> Self {
        Self {
            bits_per_second: [0; MAX_PORTS],
        }
    }

    /// Current total for `port`
    pub fn total(&self, port: u8) -> u32 {
        self.bits_per_second[port as usize]
    }

    /// Add one stream's bandwidth to `port` and update the shaper
    pub fn increase<D: DataPath>(
        &mut self,
        data_path: &mut D,
        port: u8,
        max_frame_size: u16,
        extra_byte: bool,
    ) {
        let stream = stream_bandwidth_bps(max_frame_size, extra_byte);
        self.bits_per_second[port as usize] += stream;
        data_path.set_shaper_bandwidth(port, self.bits_per_second[port as usize]);
    }

    /// Subtract one stream's bandwidth from `port` and update the shaper
    pub fn decrease<D: DataPath>(
        &mut self,
        data_path: &mut D,
        port: u8,
        max_frame_size: u16,
        extra_byte: bool,
    ) {
        let stream = stream_bandwidth_bps(max_frame_size, extra_byte);
        self.bits_per_second[port as usize] -= stream;
        data_path.set_shaper_bandwidth(port, self.bits_per_second[port as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestPlatform;

    #[test]
    fn test_class_a_reference_rate() {
        // (12 + 8 + 18 + 200 + 4) * 8 * 8000
        assert_eq!(stream_bandwidth_bps(200, false), 15_488_000);
        // Relay accounting reserves one extra octet per frame
        assert_eq!(stream_bandwidth_bps(200, true), 15_552_000);
    }

    #[test]
    fn test_totals_follow_increase_decrease() {
        let mut platform = TestPlatform::new();
        let mut bandwidth = PortBandwidth::new();

        bandwidth.increase(&mut platform, 0, 200, false);
        bandwidth.increase(&mut platform, 0, 100, false);
        bandwidth.increase(&mut platform, 1, 200, true);

        assert_eq!(
            bandwidth.total(0),
            stream_bandwidth_bps(200, false) + stream_bandwidth_bps(100, false)
        );
        assert_eq!(bandwidth.total(1), stream_bandwidth_bps(200, true));
        assert_eq!(platform.shaper[0], bandwidth.total(0));

        bandwidth.decrease(&mut platform, 0, 200, false);
        bandwidth.decrease(&mut platform, 0, 100, false);
        assert_eq!(bandwidth.total(0), 0);
        assert_eq!(platform.shaper[0], 0);
    }
}

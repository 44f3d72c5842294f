//! Driver configuration.
//!
//! Compile-time constants describe the chip limits the core is built around;
//! [`NicConfig`] carries the values the embedding kernel may change.

use bitflags::bitflags;

use crate::link::EeeMode;

/// Default number of transmit descriptors.
pub const NUM_TX_DESC: usize = 1024;
/// Default number of receive descriptors.
pub const NUM_RX_DESC: usize = 512;
/// Size of every posted receive buffer.
pub const RX_BUF_SIZE: usize = 2048;
/// Maximum segments a single outbound packet may span.
pub const MAX_SEGMENTS: usize = 40;
/// Descriptors kept in reserve so the worst-case next packet always fits.
pub const TX_SPARE_DESCS: usize = 16;
/// Frames shorter than this are copied instead of swapping the posted buffer.
pub const RX_COPY_THRESHOLD: usize = 256;

/// Ethernet header plus VLAN tag plus FCS.
pub const ETH_OVERHEAD: usize = 14 + 4 + 4;
pub const MIN_MTU: u32 = 68;
pub const DEFAULT_MTU: u32 = 1500;
/// Largest MTU whose frames still fit into a single posted buffer.
pub const MAX_MTU: u32 = (RX_BUF_SIZE - ETH_OVERHEAD) as u32;

/// More multicast addresses than this switch to accept-all-multicast.
pub const MC_FILTER_LIMIT: usize = 32;

/// Hardware interrupt mitigation timer value used in timer mode.
pub const INTR_TIMER_VALUE: u32 = 0x2600;

/// Periodic timer interval.
pub const TIMER_PERIOD_MS: u64 = 1000;
/// Idle periods before an extra reclaim pass is forced.
pub const TX_CHECK_THRESHOLD: u32 = 2;
/// Idle periods before the transmitter is declared dead.
pub const TX_DEADLOCK_THRESHOLD: u32 = 4;

/// Iterations `disable()` waits for an in-progress poll.
pub const DISABLE_POLL_WAIT_ITERS: usize = 100;
/// Delay between two of those iterations.
pub const DISABLE_POLL_WAIT_US: u64 = 100;

bitflags! {
    /// Offloads the network stack may request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Offloads: u32 {
        /// TCP segmentation over IPv4.
        const TSO4 = 1 << 0;
        /// TCP segmentation over IPv6.
        const TSO6 = 1 << 1;
        /// TCP/UDP checksum over IPv6.
        const CSUM6 = 1 << 2;
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NicConfig {
    pub mtu: u32,
    pub tx_ring_size: usize,
    pub rx_ring_size: usize,
    pub tx_spare_descs: usize,
    pub offloads: Offloads,
    /// EEE speeds the driver is allowed to advertise.
    pub eee: EeeMode,
    /// Fixed input poll interval in microseconds; `0` selects adaptive polling.
    pub poll_interval_us: u32,
}

impl Default for NicConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            tx_ring_size: NUM_TX_DESC,
            rx_ring_size: NUM_RX_DESC,
            tx_spare_descs: TX_SPARE_DESCS,
            offloads: Offloads::TSO4 | Offloads::TSO6 | Offloads::CSUM6,
            eee: EeeMode::all(),
            poll_interval_us: 0,
        }
    }
}

impl NicConfig {
    /// Whether `mtu` fits the posted receive buffers.
    pub fn mtu_supported(mtu: u32) -> bool {
        (MIN_MTU..=MAX_MTU).contains(&mtu)
    }

    /// Largest frame on the wire for the configured MTU, FCS included.
    pub fn max_frame_size(&self) -> usize {
        self.mtu as usize + ETH_OVERHEAD
    }
}

//! Driver counters and the hardware tally block.

use alloc::sync::Arc;
use core::ptr::read_volatile;

use crate::common::{DmaBuffer, RegisterPort};
use crate::error::NicResult;
use crate::kernel_func::KernelFunc;
use crate::regs::mac::{COUNTER_ADDR_HIGH, COUNTER_ADDR_LOW, COUNTER_DUMP};

/// Software counters kept by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub tx_packets: u64,
    pub tx_descriptors: u64,
    /// Submissions refused for lack of descriptors.
    pub tx_backpressure: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Frames spanning more than one descriptor.
    pub rx_fragmented: u64,
    pub rx_errors: u64,
    pub rx_crc_errors: u64,
    pub rx_runt: u64,
    pub rx_too_long: u64,
    pub rx_overflow: u64,
    /// Frames dropped because no replacement buffer could be allocated.
    pub rx_no_buffer: u64,
    pub deadlock_resets: u64,
    pub fatal_resets: u64,
    pub restarts: u64,
}

/// Tally counter block as the chip DMAs it.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyCounters {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_errors: u64,
    pub rx_errors: u32,
    pub rx_missed: u16,
    pub align_errors: u16,
    pub tx_one_collision: u32,
    pub tx_multi_collision: u32,
    pub rx_unicast: u64,
    pub rx_broadcast: u64,
    pub rx_multicast: u32,
    pub tx_aborted: u16,
    pub tx_underrun: u16,
}

/// Everything `statistics()` reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub driver: Counters,
    /// Last completed hardware dump; eventually consistent.
    pub hardware: TallyCounters,
}

/// Non-blocking dump handshake: issue a dump, and on a later call copy the
/// block out once the chip has cleared the busy bit.
pub struct TallyDump {
    mem: DmaBuffer,
    in_flight: bool,
    snapshot: TallyCounters,
}

impl TallyDump {
    pub fn new(kf: &Arc<dyn KernelFunc>) -> NicResult<Self> {
        Ok(Self {
            mem: DmaBuffer::alloc(kf, core::mem::size_of::<TallyCounters>())?,
            in_flight: false,
            snapshot: TallyCounters::default(),
        })
    }

    #[inline]
    pub fn snapshot(&self) -> TallyCounters {
        self.snapshot
    }

    /// Returns whether a new snapshot was taken.
    pub fn refresh(&mut self, regs: &dyn RegisterPort) -> bool {
        let mut updated = false;
        if self.in_flight {
            if regs.read32(COUNTER_ADDR_LOW) & COUNTER_DUMP != 0 {
                trace!("[RTL8125] tally dump still running");
                return false;
            }
            let block = self.mem.bytes(core::mem::size_of::<TallyCounters>());
            self.snapshot = unsafe { read_volatile(block.as_ptr() as *const TallyCounters) };
            self.in_flight = false;
            updated = true;
        }

        let paddr = self.mem.paddr().as_usize() as u64;
        regs.write32(COUNTER_ADDR_HIGH, (paddr >> 32) as u32);
        regs.write32(COUNTER_ADDR_LOW, paddr as u32 | COUNTER_DUMP);
        self.in_flight = true;
        updated
    }

    /// Forget an outstanding dump; the chip was reset under it.
    pub fn reset(&mut self) {
        self.in_flight = false;
    }
}

//! Receive address filtering: promiscuous mode and the 64-bit multicast hash.

use crate::common::{EthernetAddress, RegisterPort};
use crate::config::MC_FILTER_LIMIT;
use crate::regs::mac::*;

const ETHERNET_POLYNOMIAL: u32 = 0x04c1_1db7;

/// Big-endian Ethernet CRC-32 without the final inversion.
fn ether_crc(data: &[u8]) -> u32 {
    let mut crc = u32::MAX;
    for &byte in data {
        let mut byte = byte;
        for _ in 0..8 {
            let carry = (crc >> 31) ^ (byte as u32 & 1) != 0;
            crc <<= 1;
            byte >>= 1;
            if carry {
                crc ^= ETHERNET_POLYNOMIAL;
            }
        }
    }
    crc
}

/// Bit index (0..64) of `addr` in the multicast hash filter.
pub fn multicast_hash(addr: &EthernetAddress) -> u32 {
    ether_crc(&addr.0) >> 26
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxFilter {
    promiscuous: bool,
    all_multicast: bool,
    mc_filter: [u32; 2],
}

impl RxFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_promiscuous(&mut self, enabled: bool) {
        self.promiscuous = enabled;
    }

    pub fn promiscuous(&self) -> bool {
        self.promiscuous
    }

    /// Rebuild the hash from scratch. Too many addresses accept every
    /// multicast frame instead.
    pub fn set_multicast(&mut self, addrs: &[EthernetAddress]) {
        self.mc_filter = [0; 2];
        self.all_multicast = addrs.len() > MC_FILTER_LIMIT;
        if self.all_multicast {
            return;
        }
        for addr in addrs {
            let bit = multicast_hash(addr);
            self.mc_filter[(bit >> 5) as usize] |= 1 << (bit & 31);
        }
    }

    pub fn accepts_all_multicast(&self) -> bool {
        self.all_multicast || self.promiscuous
    }

    /// Hash words as seen by the chip, before byte swapping.
    pub fn filter_words(&self) -> [u32; 2] {
        if self.accepts_all_multicast() {
            [u32::MAX; 2]
        } else {
            self.mc_filter
        }
    }

    /// RCR accept bits for the current mode.
    pub fn accept_bits(&self) -> u32 {
        let mut bits = RCR_AB | RCR_APM;
        if self.accepts_all_multicast() || self.mc_filter != [0; 2] {
            bits |= RCR_AM;
        }
        if self.promiscuous {
            bits |= RCR_AAP;
        }
        bits
    }

    /// Write the hash registers and the RCR accept bits.
    pub fn program(&self, regs: &dyn RegisterPort) {
        let words = self.filter_words();
        regs.write32(MAR0, words[1].swap_bytes());
        regs.write32(MAR4, words[0].swap_bytes());

        let rcr = regs.read32(RCR) & !RCR_ACCEPT_MASK;
        regs.write32(RCR, rcr | self.accept_bits());
        debug!(
            "[RTL8125] rx filter: rcr {:#x}, mar {:08x}{:08x}",
            rcr | self.accept_bits(),
            words[1],
            words[0]
        );
    }
}

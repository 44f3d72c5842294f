//! Receive engine: consume filled descriptors and keep the ring posted.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{Ordering, fence};

use bitflags::bitflags;

use crate::common::DmaBuffer;
use crate::config::RX_COPY_THRESHOLD;
use crate::error::{NicError, NicResult};
use crate::kernel_func::KernelFunc;
use crate::regs::descriptor::*;
use crate::ring::{DmaRing, RxDescriptor};
use crate::stats::Counters;

/// Frame check sequence, stripped before delivery.
const ETH_FCS_LEN: usize = 4;

bitflags! {
    /// Checksums the hardware verified for a received frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChecksumValidity: u8 {
        const IPV4_HEADER_GOOD = 1 << 0;
        const TCP_GOOD = 1 << 1;
        const UDP_GOOD = 1 << 2;
    }
}

/// Derive the validity mask from a completed descriptor.
///
/// A recognized protocol with no failure bit is validated. Any relevant
/// failure bit clears the whole mask.
pub fn checksum_validity(opts1: u32, opts2: u32) -> ChecksumValidity {
    let proto = opts1 & RX_PROTO_MASK;
    if proto == 0 {
        return ChecksumValidity::empty();
    }
    let ipv4 = opts2 & RX_V4F != 0;
    if ipv4 && opts1 & RX_IPF != 0 {
        return ChecksumValidity::empty();
    }

    let mut valid = if ipv4 {
        ChecksumValidity::IPV4_HEADER_GOOD
    } else {
        ChecksumValidity::empty()
    };
    match proto {
        RX_PROTO_TCP if opts1 & RX_TCPF != 0 => return ChecksumValidity::empty(),
        RX_PROTO_TCP => valid |= ChecksumValidity::TCP_GOOD,
        RX_PROTO_UDP if opts1 & RX_UDPF != 0 => return ChecksumValidity::empty(),
        RX_PROTO_UDP => valid |= ChecksumValidity::UDP_GOOD,
        _ => {}
    }
    valid
}

/// Where a received frame's bytes live.
#[derive(Debug)]
pub enum RxPayload {
    /// The buffer the device wrote into; a fresh one took its place.
    Posted(DmaBuffer),
    /// A heap copy of a short frame; the posted buffer stayed in the ring.
    Copied(Vec<u8>),
}

#[derive(Debug)]
pub struct RxFrame {
    pub payload: RxPayload,
    /// Frame length without the FCS.
    pub len: usize,
    pub checksum: ChecksumValidity,
    pub vlan_tag: Option<u16>,
}

impl RxFrame {
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            RxPayload::Posted(buf) => buf.bytes(self.len),
            RxPayload::Copied(bytes) => &bytes[..self.len],
        }
    }
}

pub struct RxEngine {
    ring: DmaRing<RxDescriptor>,
    buffers: Vec<DmaBuffer>,
    next: usize,
    buf_size: usize,
    kf: Arc<dyn KernelFunc>,
}

impl RxEngine {
    /// Allocate the ring and post a buffer in every slot.
    ///
    /// On failure everything allocated so far is freed, newest first.
    pub fn new(kf: &Arc<dyn KernelFunc>, capacity: usize, buf_size: usize) -> NicResult<Self> {
        if buf_size as u32 > RX_LEN_MASK {
            return Err(NicError::InvalidRingSize(buf_size));
        }
        let ring = DmaRing::new(kf, capacity)?;
        let mut buffers = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            match DmaBuffer::alloc(kf, buf_size) {
                Ok(buf) => buffers.push(buf),
                Err(err) => {
                    warn!(
                        "[RTL8125] rx buffer allocation failed after {} of {}",
                        buffers.len(),
                        capacity
                    );
                    while let Some(buf) = buffers.pop() {
                        drop(buf);
                    }
                    return Err(err);
                }
            }
        }

        let mut engine = Self {
            ring,
            buffers,
            next: 0,
            buf_size,
            kf: kf.clone(),
        };
        engine.reset();
        Ok(engine)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn base(&self) -> memory_addr::PhysAddr {
        self.ring.base()
    }

    pub(crate) fn ring(&self) -> &DmaRing<RxDescriptor> {
        &self.ring
    }

    /// Hand slot `idx` back to the device with its current buffer.
    fn repost(&self, idx: usize) {
        let buf = &self.buffers[idx];
        self.ring.write(
            idx,
            RxDescriptor {
                opts1: 0,
                opts2: 0,
                addr: buf.paddr().as_usize() as u64,
            },
        );
        fence(Ordering::Release);
        self.ring.write_status(
            idx,
            DESC_OWN | self.ring.wrap_bit(idx) | self.buf_size as u32,
        );
    }

    /// Re-post every slot with the buffer it already holds.
    pub fn reset(&mut self) {
        for idx in 0..self.ring.capacity() {
            self.repost(idx);
        }
        self.next = 0;
    }

    /// Consume up to `max` completed descriptors, dropped frames included,
    /// and hand the good ones to `deliver`. Returns the number delivered.
    pub fn poll(
        &mut self,
        max: usize,
        counters: &mut Counters,
        mut deliver: impl FnMut(RxFrame),
    ) -> usize {
        let mut delivered = 0;
        for _ in 0..max {
            let idx = self.next;
            let desc = self.ring.read(idx);
            if desc.opts1 & DESC_OWN != 0 {
                break;
            }
            fence(Ordering::Acquire);

            if let Some(frame) = self.receive(idx, desc, counters) {
                deliver(frame);
                delivered += 1;
            }
            self.repost(idx);
            self.next = self.ring.next(idx);
        }
        delivered
    }

    fn receive(
        &mut self,
        idx: usize,
        desc: RxDescriptor,
        counters: &mut Counters,
    ) -> Option<RxFrame> {
        let status = desc.opts1;

        if status & (DESC_FS | DESC_LS) != (DESC_FS | DESC_LS) {
            counters.rx_fragmented += 1;
            counters.rx_errors += 1;
            debug!("[RTL8125] fragmented rx frame at {}: {:#x}", idx, status);
            return None;
        }

        if status & RX_RES != 0 {
            counters.rx_errors += 1;
            if status & RX_CRC != 0 {
                counters.rx_crc_errors += 1;
            }
            if status & RX_RUNT != 0 {
                counters.rx_runt += 1;
            }
            if status & RX_RWT != 0 {
                counters.rx_too_long += 1;
            }
            if status & (RX_FOVF | RX_BOVF) != 0 {
                counters.rx_overflow += 1;
            }
            trace!("[RTL8125] rx error at {}: {:#x}", idx, status);
            return None;
        }

        let wire_len = desc.frame_length();
        if wire_len <= ETH_FCS_LEN || wire_len > self.buf_size {
            counters.rx_errors += 1;
            counters.rx_too_long += (wire_len > self.buf_size) as u64;
            counters.rx_runt += (wire_len <= ETH_FCS_LEN) as u64;
            return None;
        }
        let len = wire_len - ETH_FCS_LEN;

        let payload = if len >= RX_COPY_THRESHOLD {
            let Ok(fresh) = DmaBuffer::alloc(&self.kf, self.buf_size) else {
                counters.rx_no_buffer += 1;
                return None;
            };
            RxPayload::Posted(core::mem::replace(&mut self.buffers[idx], fresh))
        } else {
            let mut bytes = Vec::new();
            if bytes.try_reserve_exact(len).is_err() {
                counters.rx_no_buffer += 1;
                return None;
            }
            bytes.extend_from_slice(self.buffers[idx].bytes(len));
            RxPayload::Copied(bytes)
        };

        let vlan_tag =
            (desc.opts2 & RX_VLAN_TAG != 0).then(|| (desc.opts2 as u16).swap_bytes());

        counters.rx_packets += 1;
        counters.rx_bytes += len as u64;
        Some(RxFrame {
            payload,
            len,
            checksum: checksum_validity(status, desc.opts2),
            vlan_tag,
        })
    }
}

impl Drop for RxEngine {
    fn drop(&mut self) {
        // Buffers go newest first; the ring itself is freed last.
        while let Some(buf) = self.buffers.pop() {
            drop(buf);
        }
    }
}

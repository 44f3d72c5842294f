//! Transmit engine: descriptor submission and completion reclaim.
//!
//! The submission path owns `next_free_index` and the software tail pointer;
//! the reclaim path (interrupt, poll or timer context) owns `dirty_index` and
//! the close pointer. Each half sits behind its own lock so the two paths
//! never wait on each other. They meet only in `free`, an atomic count of
//! descriptors available for new packets, and in `published`, the
//! submission side's index boundary read with acquire ordering.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering, fence};

use memory_addr::PhysAddr;

use crate::common::RegisterPort;
use crate::config::{MAX_SEGMENTS, Offloads};
use crate::error::{NicError, NicResult, SubmitError};
use crate::kernel_func::KernelFunc;
use crate::regs::descriptor::*;
use crate::regs::mac::{HW_CLO_PTR0, SW_TAIL_PTR0};
use crate::ring::{DmaRing, PendingTable, TxDescriptor};
use crate::sync::{Mutex, irq_mutex};

/// Offset of the transport header in an untagged IPv6 frame without
/// extension headers.
const MIN_L4_HDR_OFFSET_V6: u32 = 14 + 40;

/// One physically contiguous piece of an outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSegment {
    pub addr: PhysAddr,
    pub len: u32,
}

impl TxSegment {
    pub fn new(addr: PhysAddr, len: u32) -> Self {
        Self { addr, len }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Ipv4Tcp,
    Ipv4Udp,
    Ipv6Tcp,
    Ipv6Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationKind {
    Tcp4,
    Tcp6,
}

/// Per-packet hardware work requested by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Offload {
    #[default]
    None,
    ChecksumOnly {
        kind: ChecksumKind,
        /// Offset of the transport header from the start of the frame. The
        /// chip only needs it for IPv6.
        header_offset: u16,
    },
    Segmentation {
        kind: SegmentationKind,
        mss: u16,
        /// Offset of the TCP header from the start of the frame.
        header_offset: u16,
    },
}

/// A packet ready for the ring.
///
/// `handle` is kept by the driver until the device has sent the last
/// descriptor of the packet, then dropped.
pub struct OutboundPacket<P> {
    pub handle: P,
    pub segments: Vec<TxSegment>,
    pub offload: Offload,
    pub vlan_tag: Option<u16>,
}

impl<P> OutboundPacket<P> {
    pub fn new(handle: P, segments: Vec<TxSegment>) -> Self {
        Self {
            handle,
            segments,
            offload: Offload::None,
            vlan_tag: None,
        }
    }

    pub fn with_offload(mut self, offload: Offload) -> Self {
        self.offload = offload;
        self
    }

    pub fn with_vlan(mut self, tag: u16) -> Self {
        self.vlan_tag = Some(tag);
        self
    }
}

/// Outcome of one reclaim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxReclaim {
    pub descriptors: usize,
    pub packets: usize,
    /// Enough descriptors are free again to restart a stalled output queue.
    pub wake: bool,
}

impl TxReclaim {
    pub fn did_work(&self) -> bool {
        self.descriptors > 0
    }
}

#[derive(Default)]
struct TxProducer {
    next_free: usize,
    tail_ptr: u16,
}

#[derive(Default)]
struct TxConsumer {
    dirty: usize,
    close_ptr: u16,
}

/// Transmit ring plus pending-packet table and free-descriptor accounting.
pub struct TxEngine<P> {
    ring: DmaRing<TxDescriptor>,
    pending: PendingTable<P>,
    free: AtomicUsize,
    published: AtomicUsize,
    done_count: AtomicU64,
    offloads: AtomicU32,
    open: AtomicBool,
    producer: Mutex<TxProducer>,
    consumer: Mutex<TxConsumer>,
    spare: usize,
    wake_threshold: usize,
}

impl<P: Send> TxEngine<P> {
    pub fn new(
        kf: &Arc<dyn KernelFunc>,
        capacity: usize,
        spare: usize,
        offloads: Offloads,
    ) -> NicResult<Self> {
        if spare + 2 > capacity {
            return Err(NicError::InvalidRingSize(capacity));
        }
        let ring = DmaRing::new(kf, capacity)?;
        ring.write_status(capacity - 1, DESC_EOR);

        Ok(Self {
            ring,
            pending: PendingTable::new(capacity),
            free: AtomicUsize::new(capacity),
            published: AtomicUsize::new(0),
            done_count: AtomicU64::new(0),
            offloads: AtomicU32::new(offloads.bits()),
            open: AtomicBool::new(false),
            producer: irq_mutex(kf, TxProducer::default()),
            consumer: irq_mutex(kf, TxConsumer::default()),
            spare,
            wake_threshold: capacity / 4,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Descriptors available for new packets.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    /// Monotonic count of descriptors the device has completed.
    #[inline]
    pub fn done_count(&self) -> u64 {
        self.done_count.load(Ordering::Relaxed)
    }

    pub fn next_free_index(&self) -> usize {
        self.producer.lock().next_free
    }

    pub fn dirty_index(&self) -> usize {
        self.consumer.lock().dirty
    }

    pub fn base(&self) -> PhysAddr {
        self.ring.base()
    }

    pub fn set_offloads(&self, offloads: Offloads) {
        self.offloads.store(offloads.bits(), Ordering::Relaxed);
    }

    /// Start accepting packets.
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Stop accepting packets. Waits for a submission already in progress.
    pub fn close(&self) {
        let _producer = self.producer.lock();
        self.open.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn ring(&self) -> &DmaRing<TxDescriptor> {
        &self.ring
    }

    /// `(opts1 command bits, opts2)` shared by every descriptor of a packet.
    fn offload_bits(&self, offload: &Offload, vlan_tag: Option<u16>) -> Option<(u32, u32)> {
        let enabled = Offloads::from_bits_truncate(self.offloads.load(Ordering::Relaxed));
        let mut cmd = 0;
        let mut opts2 = 0;

        match *offload {
            Offload::None => {}
            Offload::ChecksumOnly {
                kind,
                header_offset,
            } => {
                opts2 |= match kind {
                    ChecksumKind::Ipv4Tcp => TX_IPV4_CS | TX_TCP_CS,
                    ChecksumKind::Ipv4Udp => TX_IPV4_CS | TX_UDP_CS,
                    ChecksumKind::Ipv6Tcp | ChecksumKind::Ipv6Udp => {
                        let header_offset = header_offset as u32;
                        if !enabled.contains(Offloads::CSUM6)
                            || header_offset < MIN_L4_HDR_OFFSET_V6
                            || header_offset > TX_TCPHO_MAX
                        {
                            return None;
                        }
                        let l4 = if kind == ChecksumKind::Ipv6Tcp {
                            TX_TCP_CS
                        } else {
                            TX_UDP_CS
                        };
                        TX_IPV6_CS | l4 | (header_offset << TX_TCPHO_SHIFT)
                    }
                };
            }
            Offload::Segmentation {
                kind,
                mss,
                header_offset,
            } => {
                let (flag, required) = match kind {
                    SegmentationKind::Tcp4 => (TX_GTSENV4, Offloads::TSO4),
                    SegmentationKind::Tcp6 => (TX_GTSENV6, Offloads::TSO6),
                };
                let (mss, header_offset) = (mss as u32, header_offset as u32);
                if !enabled.contains(required)
                    || mss == 0
                    || mss > TX_MSS_MAX
                    || header_offset > TX_GTTCPHO_MAX
                {
                    return None;
                }
                cmd |= flag | (header_offset << TX_GTTCPHO_SHIFT);
                opts2 |= mss << TX_MSS_SHIFT;
            }
        }

        if let Some(tag) = vlan_tag {
            opts2 |= TX_VLAN_TAG | tag.swap_bytes() as u32;
        }
        Some((cmd, opts2))
    }

    /// Place a packet on the ring and kick the device.
    ///
    /// The first descriptor's OWN bit is written last so the device never
    /// sees a partially written packet.
    pub fn submit(
        &self,
        regs: &dyn RegisterPort,
        packet: OutboundPacket<P>,
    ) -> Result<(), SubmitError<P>> {
        let count = packet.segments.len();
        if count == 0
            || count > MAX_SEGMENTS
            || packet
                .segments
                .iter()
                .any(|seg| seg.len == 0 || seg.len > TX_LEN_MASK)
        {
            return Err(SubmitError::Invalid(packet));
        }
        let Some((cmd, opts2)) = self.offload_bits(&packet.offload, packet.vlan_tag) else {
            return Err(SubmitError::Invalid(packet));
        };

        let mut producer = self.producer.lock();
        if !self.is_open() {
            return Err(SubmitError::LinkDown(packet));
        }
        if self.free.load(Ordering::Acquire) <= count + self.spare {
            return Err(SubmitError::NoResources(packet));
        }

        let OutboundPacket {
            handle, segments, ..
        } = packet;
        let first = producer.next_free;
        let mut first_opts1 = 0;
        let mut idx = first;
        let mut last = first;

        for (i, seg) in segments.iter().enumerate() {
            let mut opts1 = cmd | seg.len | self.ring.wrap_bit(idx);
            if i == 0 {
                opts1 |= DESC_FS;
            }
            if i == count - 1 {
                opts1 |= DESC_LS;
            }
            if i == 0 {
                first_opts1 = opts1;
            } else {
                opts1 |= DESC_OWN;
            }
            self.ring.write(
                idx,
                TxDescriptor {
                    opts1,
                    opts2,
                    addr: seg.addr.as_usize() as u64,
                },
            );
            last = idx;
            idx = self.ring.next(idx);
        }

        let stale = unsafe { self.pending.store(last, handle) };
        debug_assert!(stale.is_none(), "tx slot {last} still held a packet");

        fence(Ordering::Release);
        self.ring.write_status(first, first_opts1 | DESC_OWN);

        producer.next_free = idx;
        producer.tail_ptr = producer.tail_ptr.wrapping_add(count as u16);
        self.free.fetch_sub(count, Ordering::AcqRel);
        self.published.store(idx, Ordering::Release);
        regs.write16(SW_TAIL_PTR0, producer.tail_ptr);

        trace!(
            "[RTL8125] tx submit: slots {}..{} ({} segs), free {}",
            first,
            idx,
            count,
            self.free_count()
        );
        Ok(())
    }

    /// Retire every descriptor the device reports as sent.
    pub fn reclaim(&self, regs: &dyn RegisterPort) -> TxReclaim {
        let mut consumer = self.consumer.lock();
        let hw_close = regs.read16(HW_CLO_PTR0);
        let reported = hw_close.wrapping_sub(consumer.close_ptr) as usize;
        let in_flight = self
            .ring
            .distance(consumer.dirty, self.published.load(Ordering::Acquire));
        let completed = if reported > in_flight {
            warn!(
                "[RTL8125] close pointer {:#x} ahead of submitted work ({} > {}), resyncing",
                hw_close, reported, in_flight
            );
            in_flight
        } else {
            reported
        };
        consumer.close_ptr = hw_close;

        let mut result = TxReclaim {
            descriptors: completed,
            ..TxReclaim::default()
        };
        for _ in 0..completed {
            let dirty = consumer.dirty;
            if let Some(handle) = unsafe { self.pending.take(dirty) } {
                drop(handle);
                result.packets += 1;
            }
            self.done_count.fetch_add(1, Ordering::Relaxed);
            self.free.fetch_add(1, Ordering::Release);
            consumer.dirty = self.ring.next(dirty);
        }

        result.wake = result.packets > 0 && self.free_count() >= self.wake_threshold;
        result
    }

    /// Return the ring to its post-initialization state.
    ///
    /// Every pending packet is released. The device must be stopped.
    pub fn reset(&self) -> usize {
        let mut producer = self.producer.lock();
        let mut consumer = self.consumer.lock();
        let mut released = 0;

        for idx in 0..self.ring.capacity() {
            if unsafe { self.pending.take(idx) }.is_some() {
                released += 1;
            }
            self.ring.write(
                idx,
                TxDescriptor {
                    opts1: self.ring.wrap_bit(idx),
                    opts2: 0,
                    addr: 0,
                },
            );
        }

        *producer = TxProducer::default();
        *consumer = TxConsumer::default();
        self.published.store(0, Ordering::Release);
        self.free.store(self.ring.capacity(), Ordering::Release);
        released
    }
}

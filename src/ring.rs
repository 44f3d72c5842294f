//! Hardware descriptor rings.
//!
//! A [`DmaRing`] is a power-of-two array of 16-byte descriptors living in DMA
//! coherent memory. The driver and the device hand each descriptor back and
//! forth through its OWN bit; the ring itself only knows how to read, write
//! and index slots; ownership policy belongs to the engines.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::{addr_of_mut, read_volatile, write_volatile};

use memory_addr::{PhysAddr, VirtAddr};

use crate::common::DmaBuffer;
use crate::error::{NicError, NicResult};
use crate::kernel_func::KernelFunc;
use crate::regs::descriptor::*;

/// RTL8125 transmit descriptor
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    /// OWN/EOR/FS/LS, large-send command and the 16-bit byte length.
    pub opts1: u32,
    /// Checksum offload, MSS and VLAN tag.
    pub opts2: u32,
    pub addr: u64,
}

impl TxDescriptor {
    #[inline]
    pub fn byte_length(&self) -> u32 {
        self.opts1 & TX_LEN_MASK
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.opts1 & !TX_LEN_MASK
    }
}

/// RTL8125 receive descriptor
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDescriptor {
    /// OWN/EOR/FS/LS, error and checksum status, frame length.
    pub opts1: u32,
    /// IPv4/IPv6 flags and VLAN tag.
    pub opts2: u32,
    pub addr: u64,
}

impl RxDescriptor {
    #[inline]
    pub fn frame_length(&self) -> usize {
        (self.opts1 & RX_LEN_MASK) as usize
    }
}

/// Descriptor layouts the ring can hold.
pub trait Descriptor: Copy + Default {
    /// Pointer to the dword holding the OWN bit.
    ///
    /// # Safety
    /// `this` must point at a live descriptor.
    unsafe fn status_ptr(this: *mut Self) -> *mut u32;
}

impl Descriptor for TxDescriptor {
    unsafe fn status_ptr(this: *mut Self) -> *mut u32 {
        unsafe { addr_of_mut!((*this).opts1) }
    }
}

impl Descriptor for RxDescriptor {
    unsafe fn status_ptr(this: *mut Self) -> *mut u32 {
        unsafe { addr_of_mut!((*this).opts1) }
    }
}

/// Fixed-capacity circular array of hardware-visible descriptors.
pub struct DmaRing<T: Descriptor> {
    mem: DmaBuffer,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: Descriptor> DmaRing<T> {
    /// Allocate a zeroed ring of `capacity` descriptors.
    pub fn new(kf: &Arc<dyn KernelFunc>, capacity: usize) -> NicResult<Self> {
        if capacity < 2 || !capacity.is_power_of_two() || capacity > u16::MAX as usize {
            return Err(NicError::InvalidRingSize(capacity));
        }
        let mem = DmaBuffer::alloc(kf, capacity * size_of::<T>())?;
        let ring = Self {
            mem,
            capacity,
            _marker: PhantomData,
        };
        for idx in 0..capacity {
            ring.write(idx, T::default());
        }
        Ok(ring)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical address of the first descriptor, for the ring base registers.
    #[inline]
    pub fn base(&self) -> PhysAddr {
        self.mem.paddr()
    }

    #[inline]
    fn slot(&self, idx: usize) -> *mut T {
        assert!(idx < self.capacity, "descriptor index {idx} out of range");
        unsafe { self.mem.as_ptr::<T>().add(idx) }
    }

    #[inline]
    fn slot_vaddr(&self, idx: usize) -> VirtAddr {
        VirtAddr::from_usize(self.slot(idx) as usize)
    }

    /// Read a descriptor as the device last left it.
    pub fn read(&self, idx: usize) -> T {
        self.mem
            .kf()
            .invalidate_dcache_range(self.slot_vaddr(idx), size_of::<T>());
        unsafe { read_volatile(self.slot(idx)) }
    }

    /// Write a whole descriptor.
    pub fn write(&self, idx: usize, desc: T) {
        unsafe { write_volatile(self.slot(idx), desc) }
        self.mem
            .kf()
            .clean_dcache_range(self.slot_vaddr(idx), size_of::<T>());
    }

    /// Rewrite only the status dword, leaving address and opts2 untouched.
    pub fn write_status(&self, idx: usize, status: u32) {
        unsafe { write_volatile(T::status_ptr(self.slot(idx)), status) }
        self.mem
            .kf()
            .clean_dcache_range(self.slot_vaddr(idx), size_of::<T>());
    }

    /// Current status dword.
    pub fn status(&self, idx: usize) -> u32 {
        self.mem
            .kf()
            .invalidate_dcache_range(self.slot_vaddr(idx), size_of::<T>());
        unsafe { read_volatile(T::status_ptr(self.slot(idx))) }
    }

    #[inline]
    pub fn is_hw_owned(&self, idx: usize) -> bool {
        self.status(idx) & DESC_OWN != 0
    }

    #[inline]
    pub fn is_last(&self, idx: usize) -> bool {
        idx == self.capacity - 1
    }

    /// EOR bit for the slot, set only on the final descriptor.
    #[inline]
    pub fn wrap_bit(&self, idx: usize) -> u32 {
        if self.is_last(idx) { DESC_EOR } else { 0 }
    }

    #[inline]
    pub fn next(&self, idx: usize) -> usize {
        self.advance(idx, 1)
    }

    #[inline]
    pub fn advance(&self, idx: usize, n: usize) -> usize {
        (idx + n) % self.capacity
    }

    /// Slots from `from` up to (not including) `to`, walking forward.
    #[inline]
    pub fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.capacity - from) % self.capacity
    }
}

// Slots are shared with the device and split between the submission and
// reclaim sides by index; every access goes through volatile reads/writes.
unsafe impl<T: Descriptor> Send for DmaRing<T> {}
unsafe impl<T: Descriptor> Sync for DmaRing<T> {}

/// One handle slot per descriptor index.
///
/// The submission side only stores into slots it has not yet published to the
/// device; the reclaim side only takes from slots the device has completed.
/// The two sides never touch the same slot concurrently.
pub struct PendingTable<P> {
    slots: Box<[UnsafeCell<Option<P>>]>,
}

unsafe impl<P: Send> Send for PendingTable<P> {}
unsafe impl<P: Send> Sync for PendingTable<P> {}

impl<P> PendingTable<P> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
        }
    }

    /// # Safety
    /// The caller must own slot `idx` (not visible to the reclaim side).
    pub unsafe fn store(&self, idx: usize, handle: P) -> Option<P> {
        unsafe { (*self.slots[idx].get()).replace(handle) }
    }

    /// # Safety
    /// The caller must own slot `idx` (completed, not yet reused).
    pub unsafe fn take(&self, idx: usize) -> Option<P> {
        unsafe { (*self.slots[idx].get()).take() }
    }
}

//! Register access and DMA memory helpers shared by the rings.

use alloc::sync::Arc;
use core::fmt;
use core::ptr::{read_volatile, write_volatile};

use memory_addr::{PhysAddr, VirtAddr};

use crate::error::{NicError, NicResult};
use crate::kernel_func::KernelFunc;

const PAGE_SIZE: usize = 4096;

/// Fixed-width access to the chip's register window.
pub trait RegisterPort: Send + Sync {
    fn read8(&self, offset: u16) -> u8;
    fn read16(&self, offset: u16) -> u16;
    fn read32(&self, offset: u16) -> u32;
    fn write8(&self, offset: u16, value: u8);
    fn write16(&self, offset: u16, value: u16);
    fn write32(&self, offset: u16, value: u32);
}

/// MMIO register access helper
pub struct MmioOps {
    base_addr: usize,
}

impl MmioOps {
    /// Create a new MMIO operations helper
    ///
    /// # Safety
    /// `base_addr` must be the mapped, uncached register BAR of the device
    /// and stay mapped for the lifetime of the returned value.
    #[inline]
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    /// Get base address
    #[inline]
    pub fn base_addr(&self) -> usize {
        self.base_addr
    }
}

impl RegisterPort for MmioOps {
    #[inline]
    fn read8(&self, offset: u16) -> u8 {
        unsafe { read_volatile((self.base_addr + offset as usize) as *const u8) }
    }

    #[inline]
    fn read16(&self, offset: u16) -> u16 {
        unsafe { read_volatile((self.base_addr + offset as usize) as *const u16) }
    }

    #[inline]
    fn read32(&self, offset: u16) -> u32 {
        unsafe { read_volatile((self.base_addr + offset as usize) as *const u32) }
    }

    #[inline]
    fn write8(&self, offset: u16, value: u8) {
        unsafe { write_volatile((self.base_addr + offset as usize) as *mut u8, value) }
    }

    #[inline]
    fn write16(&self, offset: u16, value: u16) {
        unsafe { write_volatile((self.base_addr + offset as usize) as *mut u16, value) }
    }

    #[inline]
    fn write32(&self, offset: u16, value: u32) {
        unsafe { write_volatile((self.base_addr + offset as usize) as *mut u32, value) }
    }
}

/// DMA buffer management
///
/// The memory is returned to the kernel when the buffer is dropped.
pub struct DmaBuffer {
    vaddr: VirtAddr,
    paddr: PhysAddr,
    pages: usize,
    kf: Arc<dyn KernelFunc>,
}

// The buffer is plain memory owned by exactly one ring slot or frame at a time.
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// Allocate a new DMA buffer
    pub fn alloc(kf: &Arc<dyn KernelFunc>, size: usize) -> NicResult<Self> {
        let pages = RealtekCommon::pages_for_size(size).max(1);
        let (vaddr, paddr) = kf.dma_alloc_coherent(pages).ok_or(NicError::NoMemory)?;

        Ok(Self {
            vaddr,
            paddr,
            pages,
            kf: kf.clone(),
        })
    }

    /// Get virtual address
    #[inline]
    pub fn vaddr(&self) -> VirtAddr {
        self.vaddr
    }

    /// Get physical address
    #[inline]
    pub fn paddr(&self) -> PhysAddr {
        self.paddr
    }

    /// Get size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    /// First `len` bytes of the buffer, as last written by the device.
    pub fn bytes(&self, len: usize) -> &[u8] {
        let len = len.min(self.size());
        self.kf.invalidate_dcache_range(self.vaddr, len);
        unsafe { core::slice::from_raw_parts(self.vaddr.as_usize() as *const u8, len) }
    }

    #[inline]
    pub(crate) fn as_ptr<T>(&self) -> *mut T {
        self.vaddr.as_usize() as *mut T
    }

    #[inline]
    pub(crate) fn kf(&self) -> &Arc<dyn KernelFunc> {
        &self.kf
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe { self.kf.dma_free_coherent(self.vaddr, self.pages) }
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("vaddr", &self.vaddr)
            .field("paddr", &self.paddr)
            .field("pages", &self.pages)
            .finish()
    }
}

/// The ethernet address of the NIC (MAC address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for EthernetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Common utilities for RealTek drivers
pub struct RealtekCommon;

impl RealtekCommon {
    /// Read MAC address from device
    pub fn read_mac_address(regs: &dyn RegisterPort, mac_offset: u16) -> EthernetAddress {
        let mut mac = [0u8; 6];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = regs.read8(mac_offset + i as u16);
        }
        EthernetAddress(mac)
    }

    /// Calculate pages needed for a given size
    #[inline]
    pub fn pages_for_size(size: usize) -> usize {
        size.div_ceil(PAGE_SIZE)
    }
}

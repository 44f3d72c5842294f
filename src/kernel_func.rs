//! Interfaces the embedding kernel must implement for the driver.
//!
//! [`KernelFunc`] provides DMA memory, timing, local interrupt masking and
//! cache maintenance.
//! [`ChipOps`] wraps the vendor bring-up sequences (chip reset, the long
//! magic-register init tables, per-speed PHY tuning) that live outside this
//! core.

use core::time::Duration;

use memory_addr::{PhysAddr, VirtAddr};

use crate::link::{EeeMode, LinkSpeed};

/// Kernel services used by the driver.
pub trait KernelFunc: Send + Sync {
    /// Allocate `pages` zeroed, physically contiguous pages of DMA coherent
    /// memory, returning `(virtual_address, physical_address)`.
    fn dma_alloc_coherent(&self, pages: usize) -> Option<(VirtAddr, PhysAddr)>;

    /// Free memory previously returned by [`KernelFunc::dma_alloc_coherent`].
    ///
    /// # Safety
    /// `vaddr`/`pages` must describe exactly one live allocation, and nothing
    /// (including the device) may access it afterwards.
    unsafe fn dma_free_coherent(&self, vaddr: VirtAddr, pages: usize);

    /// Busy-wait for the specified duration
    fn busy_wait(&self, duration: Duration);

    /// Whether interrupts are masked on the current CPU.
    fn irqs_disabled(&self) -> bool;

    /// Mask interrupts on the current CPU.
    fn disable_irqs(&self);

    /// Unmask interrupts on the current CPU.
    fn enable_irqs(&self);

    /// Clean (write-back) data cache range
    ///
    /// Ensures CPU-written data is flushed to memory so hardware DMA can see
    /// it. Cache-coherent platforms keep the default no-op.
    fn clean_dcache_range(&self, _addr: VirtAddr, _size: usize) {}

    /// Invalidate (discard) data cache range
    ///
    /// Forces the CPU to read hardware-written data from memory.
    fn invalidate_dcache_range(&self, _addr: VirtAddr, _size: usize) {}
}

/// Vendor-specific chip sequences.
pub trait ChipOps: Send + Sync {
    /// Issue the hardware reset primitive and wait for it to finish.
    fn reset_chip(&self);

    /// Run the chip setup sequence after a reset. Ring base addresses,
    /// receive mode and interrupt mask are programmed by the core afterwards.
    fn init_chip(&self) -> anyhow::Result<()>;

    /// Apply the per-speed PHY/MAC tuning once a link is established.
    fn setup_speed(&self, speed: LinkSpeed);

    /// Reset PHY state after the link was lost.
    fn reset_phy(&self);

    /// EEE modes negotiated with the link partner.
    fn negotiated_eee(&self) -> EeeMode {
        EeeMode::empty()
    }
}

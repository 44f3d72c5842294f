//! Host-side stand-ins for the chip, the kernel and the network stack.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::Cell;
use std::thread_local;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::Mutex as StdMutex;

use memory_addr::{PhysAddr, VirtAddr};

use crate::common::RegisterPort;
use crate::kernel_func::{ChipOps, KernelFunc};
use crate::link::{EeeMode, LinkPhase, LinkSpeed, LinkState, PollParams};
use crate::regs::descriptor::*;
use crate::regs::mac::*;
use crate::ring::{DmaRing, RxDescriptor, TxDescriptor};
use crate::rx::RxFrame;
use crate::stack::NetStack;
use crate::stats::TallyCounters;
use crate::tx::{OutboundPacket, TxSegment};

const PAGE_SIZE: usize = 4096;
const REG_WINDOW: usize = 0x3000;

/// Both fragment bits: a frame in a single descriptor.
pub const RX_WHOLE: u32 = DESC_FS | DESC_LS;

pub fn seg(addr: usize, len: u32) -> TxSegment {
    TxSegment::new(PhysAddr::from_usize(addr), len)
}

struct RegFile {
    bytes: Vec<u8>,
    log: Vec<(u16, u32)>,
}

/// Register window backed by plain memory. ISR0 is write-1-to-clear.
#[derive(Clone)]
pub struct FakeRegs {
    inner: Arc<StdMutex<RegFile>>,
}

impl FakeRegs {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StdMutex::new(RegFile {
                bytes: alloc::vec![0; REG_WINDOW],
                log: Vec::new(),
            })),
        }
    }

    fn load(&self, offset: u16, width: usize) -> u32 {
        let file = self.inner.lock().unwrap();
        let start = offset as usize;
        let mut raw = [0u8; 4];
        raw[..width].copy_from_slice(&file.bytes[start..start + width]);
        u32::from_le_bytes(raw)
    }

    fn store(&self, offset: u16, width: usize, value: u32) {
        let mut file = self.inner.lock().unwrap();
        let start = offset as usize;
        let value = if offset == ISR0 && width == 4 {
            let current = u32::from_le_bytes(file.bytes[start..start + 4].try_into().unwrap());
            current & !value
        } else {
            value
        };
        file.bytes[start..start + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    fn record(&self, offset: u16, value: u32) {
        self.inner.lock().unwrap().log.push((offset, value));
    }

    /// Device-side write that bypasses the log and ISR semantics.
    pub fn poke32(&self, offset: u16, value: u32) {
        let mut file = self.inner.lock().unwrap();
        let start = offset as usize;
        file.bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn poke16(&self, offset: u16, value: u16) {
        let mut file = self.inner.lock().unwrap();
        let start = offset as usize;
        file.bytes[start..start + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_mac(&self, mac: [u8; 6]) {
        let mut file = self.inner.lock().unwrap();
        file.bytes[MAC0 as usize..MAC0 as usize + 6].copy_from_slice(&mac);
    }

    pub fn set_phy_status(&self, raw: u16) {
        self.poke16(PHYSTATUS, raw);
    }

    /// Latch interrupt status bits.
    pub fn raise(&self, status: u32) {
        let current = self.load(ISR0, 4);
        self.poke32(ISR0, current | status);
    }

    /// Every value the driver wrote to `offset`, oldest first.
    pub fn writes_to(&self, offset: u16) -> Vec<u32> {
        let file = self.inner.lock().unwrap();
        file.log
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_log(&self) {
        self.inner.lock().unwrap().log.clear();
    }
}

impl RegisterPort for FakeRegs {
    fn read8(&self, offset: u16) -> u8 {
        self.load(offset, 1) as u8
    }

    fn read16(&self, offset: u16) -> u16 {
        self.load(offset, 2) as u16
    }

    fn read32(&self, offset: u16) -> u32 {
        self.load(offset, 4)
    }

    fn write8(&self, offset: u16, value: u8) {
        self.record(offset, value as u32);
        self.store(offset, 1, value as u32);
    }

    fn write16(&self, offset: u16, value: u16) {
        self.record(offset, value as u32);
        self.store(offset, 2, value as u32);
    }

    fn write32(&self, offset: u16, value: u32) {
        self.record(offset, value);
        self.store(offset, 4, value);
    }
}

thread_local! {
    /// Interrupt state of the "CPU" each test thread runs on.
    static IRQS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

#[derive(Default)]
struct KernelState {
    live: BTreeMap<usize, Layout>,
    alloc_log: Vec<usize>,
    free_log: Vec<usize>,
    /// Allocations left before every further one fails.
    budget: Option<usize>,
    waited: Duration,
    irq_disables: usize,
}

/// Page-aligned heap memory with physical == virtual addresses.
#[derive(Clone, Default)]
pub struct FakeKernel {
    inner: Arc<StdMutex<KernelState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_kf(&self) -> Arc<dyn KernelFunc> {
        Arc::new(self.clone())
    }

    /// Let `n` more allocations succeed, then fail all of them.
    pub fn fail_after(&self, n: usize) {
        self.inner.lock().unwrap().budget = Some(n);
    }

    pub fn live_allocations(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    pub fn alloc_log(&self) -> Vec<usize> {
        self.inner.lock().unwrap().alloc_log.clone()
    }

    pub fn free_log(&self) -> Vec<usize> {
        self.inner.lock().unwrap().free_log.clone()
    }

    pub fn waited(&self) -> Duration {
        self.inner.lock().unwrap().waited
    }

    /// Interrupt state of the calling thread.
    pub fn irqs_enabled(&self) -> bool {
        IRQS_ENABLED.with(Cell::get)
    }

    pub fn set_irqs_enabled(&self, enabled: bool) {
        IRQS_ENABLED.with(|irqs| irqs.set(enabled));
    }

    /// How often interrupts were masked, across all threads.
    pub fn irq_disables(&self) -> usize {
        self.inner.lock().unwrap().irq_disables
    }
}

impl KernelFunc for FakeKernel {
    fn dma_alloc_coherent(&self, pages: usize) -> Option<(VirtAddr, PhysAddr)> {
        let mut state = self.inner.lock().unwrap();
        if let Some(budget) = state.budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        let addr = ptr as usize;
        state.live.insert(addr, layout);
        state.alloc_log.push(addr);
        Some((VirtAddr::from_usize(addr), PhysAddr::from_usize(addr)))
    }

    unsafe fn dma_free_coherent(&self, vaddr: VirtAddr, pages: usize) {
        let mut state = self.inner.lock().unwrap();
        let addr = vaddr.as_usize();
        let layout = state.live.remove(&addr).expect("freeing unknown DMA memory");
        assert_eq!(layout.size(), pages * PAGE_SIZE);
        state.free_log.push(addr);
        unsafe { dealloc(addr as *mut u8, layout) };
    }

    fn busy_wait(&self, duration: Duration) {
        self.inner.lock().unwrap().waited += duration;
    }

    fn irqs_disabled(&self) -> bool {
        !self.irqs_enabled()
    }

    fn disable_irqs(&self) {
        self.inner.lock().unwrap().irq_disables += 1;
        self.set_irqs_enabled(false);
    }

    fn enable_irqs(&self) {
        self.set_irqs_enabled(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipCall {
    Reset,
    Init,
    SetupSpeed(LinkSpeed),
    ResetPhy,
}

#[derive(Default)]
struct ChipState {
    calls: Vec<ChipCall>,
    eee: EeeMode,
    fail_init: bool,
}

/// Vendor sequences reduced to a call log. Resetting the chip clears the
/// transmit pointers like the real one does.
#[derive(Clone)]
pub struct FakeChip {
    regs: FakeRegs,
    inner: Arc<StdMutex<ChipState>>,
}

impl FakeChip {
    pub fn new(regs: &FakeRegs) -> Self {
        Self {
            regs: regs.clone(),
            inner: Arc::new(StdMutex::new(ChipState::default())),
        }
    }

    pub fn calls(&self) -> Vec<ChipCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn set_eee(&self, eee: EeeMode) {
        self.inner.lock().unwrap().eee = eee;
    }

    pub fn fail_init(&self, fail: bool) {
        self.inner.lock().unwrap().fail_init = fail;
    }
}

impl ChipOps for FakeChip {
    fn reset_chip(&self) {
        self.inner.lock().unwrap().calls.push(ChipCall::Reset);
        self.regs.poke16(HW_CLO_PTR0, 0);
        self.regs.poke16(SW_TAIL_PTR0, 0);
        self.regs.poke32(COUNTER_ADDR_LOW, 0);
    }

    fn init_chip(&self) -> anyhow::Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(ChipCall::Init);
        if state.fail_init {
            anyhow::bail!("PHY did not respond");
        }
        Ok(())
    }

    fn setup_speed(&self, speed: LinkSpeed) {
        self.inner.lock().unwrap().calls.push(ChipCall::SetupSpeed(speed));
    }

    fn reset_phy(&self) {
        self.inner.lock().unwrap().calls.push(ChipCall::ResetPhy);
    }

    fn negotiated_eee(&self) -> EeeMode {
        self.inner.lock().unwrap().eee
    }
}

/// Packet handle that counts how often it (or any clone) was released.
pub struct TestPacket {
    drops: Arc<AtomicUsize>,
}

impl TestPacket {
    pub fn new() -> Self {
        Self {
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn clone_handle(&self) -> Self {
        Self {
            drops: self.drops.clone(),
        }
    }

    pub fn releases(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

impl Drop for TestPacket {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Start,
    Stop,
    Flush,
    Wake,
    FlushInput,
    Link(LinkPhase),
}

#[derive(Default)]
struct StackState {
    queue: VecDeque<OutboundPacket<TestPacket>>,
    frames: Vec<RxFrame>,
    events: Vec<StackEvent>,
    polling: Option<PollParams>,
    link: LinkState,
}

#[derive(Clone, Default)]
pub struct FakeStack {
    inner: Arc<StdMutex<StackState>>,
}

impl FakeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, packet: OutboundPacket<TestPacket>) {
        self.inner.lock().unwrap().queue.push_back(packet);
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn take_frames(&self) -> Vec<RxFrame> {
        core::mem::take(&mut self.inner.lock().unwrap().frames)
    }

    pub fn events(&self) -> Vec<StackEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    pub fn polling(&self) -> Option<PollParams> {
        self.inner.lock().unwrap().polling
    }

    pub fn link(&self) -> LinkState {
        self.inner.lock().unwrap().link
    }

    fn event(&self, event: StackEvent) {
        self.inner.lock().unwrap().events.push(event);
    }
}

impl NetStack for FakeStack {
    type Packet = TestPacket;

    fn dequeue_output(&self) -> Option<OutboundPacket<TestPacket>> {
        self.inner.lock().unwrap().queue.pop_front()
    }

    fn requeue_output(&self, packet: OutboundPacket<TestPacket>) {
        self.inner.lock().unwrap().queue.push_front(packet);
    }

    fn deliver_input(&self, frame: RxFrame) {
        self.inner.lock().unwrap().frames.push(frame);
    }

    fn flush_input(&self) {
        self.event(StackEvent::FlushInput);
    }

    fn start_output(&self) {
        self.event(StackEvent::Start);
    }

    fn stop_output(&self) {
        self.event(StackEvent::Stop);
    }

    fn flush_output(&self) {
        self.event(StackEvent::Flush);
        self.inner.lock().unwrap().queue.clear();
    }

    fn wake_output(&self) {
        self.event(StackEvent::Wake);
    }

    fn link_changed(&self, state: &LinkState) {
        let mut inner = self.inner.lock().unwrap();
        inner.link = *state;
        inner.events.push(StackEvent::Link(state.phase));
    }

    fn configure_polling(&self, params: PollParams) {
        self.inner.lock().unwrap().polling = Some(params);
    }
}

/// The device side of the rings.
pub struct HwModel {
    regs: FakeRegs,
    tx_cursor: Cell<usize>,
}

impl HwModel {
    pub fn new(regs: &FakeRegs) -> Self {
        Self {
            regs: regs.clone(),
            tx_cursor: Cell::new(0),
        }
    }

    /// Next transmit descriptor the device will finish.
    pub fn tx_cursor(&self) -> usize {
        self.tx_cursor.get()
    }

    /// Send up to `n` owned descriptors in order, clear OWN and advance the
    /// close pointer. Stops at the software tail pointer like the chip does.
    /// Returns how many were sent.
    pub fn complete_tx(&self, ring: &DmaRing<TxDescriptor>, n: usize) -> usize {
        let tail = self.regs.read16(SW_TAIL_PTR0);
        let close = self.regs.read16(HW_CLO_PTR0);
        let mut done = 0;
        while done < n && close.wrapping_add(done as u16) != tail {
            let idx = self.tx_cursor.get();
            if !ring.is_hw_owned(idx) {
                break;
            }
            ring.write_status(idx, ring.status(idx) & !DESC_OWN);
            self.tx_cursor.set(ring.next(idx));
            done += 1;
        }
        let close = self.regs.read16(HW_CLO_PTR0);
        self.regs.poke16(HW_CLO_PTR0, close.wrapping_add(done as u16));
        done
    }

    /// Write `payload` (plus an FCS) into the buffer posted at `idx` and
    /// hand the descriptor back with the given status bits.
    pub fn fill_rx(
        &self,
        ring: &DmaRing<RxDescriptor>,
        idx: usize,
        payload: &[u8],
        opts1: u32,
        opts2: u32,
    ) {
        let desc = ring.read(idx);
        assert!(ring.is_hw_owned(idx), "rx slot {idx} not posted");
        let buf = desc.addr as usize as *mut u8;
        unsafe { core::ptr::copy_nonoverlapping(payload.as_ptr(), buf, payload.len()) };
        let len = (payload.len() + 4) as u32;
        ring.write(
            idx,
            RxDescriptor {
                opts1: (desc.opts1 & DESC_EOR) | opts1 | len,
                opts2,
                addr: desc.addr,
            },
        );
    }

    /// Finish an outstanding tally dump with `counters`.
    pub fn complete_tally_dump(&self, counters: &TallyCounters) {
        let low = self.regs.read32(COUNTER_ADDR_LOW);
        assert_ne!(low & COUNTER_DUMP, 0, "no tally dump requested");
        let high = self.regs.read32(COUNTER_ADDR_HIGH);
        let addr = ((high as u64) << 32 | (low & !0x3f) as u64) as usize;
        unsafe { core::ptr::write(addr as *mut TallyCounters, *counters) };
        self.regs.poke32(COUNTER_ADDR_LOW, low & !COUNTER_DUMP);
    }
}

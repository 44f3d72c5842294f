//! RTL8125 controller: lifecycle, interrupt and timer entry points.
//!
//! Lock order is `core` then the transmit engine's producer/consumer locks.
//! The submission path only ever takes the producer lock.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

use anyhow::Context;

use crate::common::{EthernetAddress, RealtekCommon, RegisterPort};
use crate::config::*;
use crate::error::{DriverResult, NicError, NicResult, SubmitError};
use crate::filter::RxFilter;
use crate::interrupt::{InterruptCoordinator, InterruptOutcome, InterruptSink, RingWork};
use crate::kernel_func::{ChipOps, KernelFunc};
use crate::link::{LinkState, LinkStateMachine, LinkTransition, PollParams};
use crate::regs::mac::*;
use crate::rx::RxEngine;
use crate::stack::NetStack;
use crate::stats::{Counters, Statistics, TallyDump};
use crate::sync::{Mutex, irq_mutex};
use crate::tx::{OutboundPacket, TxEngine, TxReclaim};
use crate::watchdog::{DeadlockMonitor, WatchdogVerdict};

/// Everything the interrupt, timer and control paths share.
struct Control {
    tally: TallyDump,
    rx: RxEngine,
    link: LinkStateMachine,
    monitor: DeadlockMonitor,
    counters: Counters,
    filter: RxFilter,
    config: NicConfig,
}

struct Core {
    irq: InterruptCoordinator,
    ctl: Control,
}

/// RTL8125 driver instance
pub struct Rtl8125<R: RegisterPort, C: ChipOps, S: NetStack> {
    regs: R,
    chip: C,
    stack: S,
    kf: Arc<dyn KernelFunc>,
    mac: EthernetAddress,
    core: Mutex<Core>,
    tx: TxEngine<S::Packet>,
    enabled: AtomicBool,
    running: AtomicBool,
    poll_mode: AtomicBool,
    polling: AtomicBool,
    in_interrupt: AtomicBool,
    timer_armed: AtomicBool,
    tx_backpressure: AtomicU64,
}

impl<R: RegisterPort, C: ChipOps, S: NetStack> Rtl8125<R, C, S> {
    /// Activate the driver: read the MAC and allocate every DMA resource.
    ///
    /// The hardware is left untouched until [`Self::enable`].
    pub fn new(
        regs: R,
        chip: C,
        stack: S,
        kf: Arc<dyn KernelFunc>,
        config: NicConfig,
    ) -> DriverResult<Self> {
        if !NicConfig::mtu_supported(config.mtu) {
            anyhow::bail!("{}", NicError::InvalidMtu(config.mtu));
        }

        let mac = RealtekCommon::read_mac_address(&regs, MAC0);
        info!("[RTL8125] MAC address: {}", mac);

        let tx = TxEngine::new(
            &kf,
            config.tx_ring_size,
            config.tx_spare_descs,
            config.offloads,
        )
        .context("Failed to allocate tx ring")?;
        let rx = RxEngine::new(&kf, config.rx_ring_size, RX_BUF_SIZE)
            .context("Failed to allocate rx ring")?;
        let tally = TallyDump::new(&kf).context("Failed to allocate tally block")?;

        info!(
            "[RTL8125] {} tx / {} rx descriptors, MTU {}",
            config.tx_ring_size, config.rx_ring_size, config.mtu
        );

        let core = irq_mutex(
            &kf,
            Core {
                irq: InterruptCoordinator::new(),
                ctl: Control {
                    tally,
                    rx,
                    link: LinkStateMachine::new(config.eee),
                    monitor: DeadlockMonitor::new(),
                    counters: Counters::default(),
                    filter: RxFilter::new(),
                    config,
                },
            },
        );

        Ok(Self {
            regs,
            chip,
            stack,
            kf,
            mac,
            core,
            tx,
            enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            poll_mode: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            in_interrupt: AtomicBool::new(false),
            timer_armed: AtomicBool::new(false),
            tx_backpressure: AtomicU64::new(0),
        })
    }

    /// Bring the hardware up and start link negotiation.
    pub fn enable(&self) -> DriverResult {
        if self.enabled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut core = self.core.lock();
        let Core { irq, ctl } = &mut *core;
        if let Err(err) = self.reset_hardware(ctl) {
            self.enabled.store(false, Ordering::Release);
            return Err(err.context("Failed to enable RTL8125"));
        }
        irq.reset();
        irq.unmask(&self.regs);

        ctl.link.begin_negotiation();
        self.handle_link_change(ctl);
        info!("[RTL8125] enabled");
        Ok(())
    }

    /// Stop the hardware. Queued output is flushed and in-flight packets are
    /// released.
    pub fn disable(&self) {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }

        let mut waits = 0;
        while self.polling.load(Ordering::Acquire) && waits < DISABLE_POLL_WAIT_ITERS {
            self.kf
                .busy_wait(Duration::from_micros(DISABLE_POLL_WAIT_US));
            waits += 1;
        }
        if self.polling.load(Ordering::Acquire) {
            warn!("[RTL8125] input poll still running, disabling anyway");
        }

        let mut core = self.core.lock();
        let Core { irq, ctl } = &mut *core;
        irq.mask_all(&self.regs);
        if self.quiesce(ctl) {
            self.stack.link_changed(&ctl.link.state());
        }
        self.clear_rings(ctl);
        info!("[RTL8125] disabled");
    }

    /// Queue one packet on the transmit ring.
    pub fn submit(
        &self,
        packet: OutboundPacket<S::Packet>,
    ) -> Result<(), SubmitError<S::Packet>> {
        let result = self.tx.submit(&self.regs, packet);
        if let Err(err) = &result {
            if err.is_backpressure() {
                self.tx_backpressure.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Move packets from the stack's output queue onto the ring until it is
    /// empty or the ring is full. Returns the number submitted.
    pub fn transmit_pending(&self) -> usize {
        let mut sent = 0;
        while let Some(packet) = self.stack.dequeue_output() {
            match self.submit(packet) {
                Ok(()) => sent += 1,
                Err(SubmitError::Invalid(packet)) => {
                    warn!(
                        "[RTL8125] dropping packet the ring cannot express ({} segments, {:?})",
                        packet.segments.len(),
                        packet.offload
                    );
                }
                Err(err) => {
                    self.stack.requeue_output(err.into_packet());
                    break;
                }
            }
        }
        sent
    }

    /// Change the MTU. A different valid value restarts the controller.
    pub fn set_max_packet_size(&self, mtu: u32) -> NicResult {
        if !NicConfig::mtu_supported(mtu) {
            return Err(NicError::InvalidMtu(mtu));
        }

        let mut core = self.core.lock();
        let Core { irq, ctl } = &mut *core;
        if ctl.config.mtu == mtu {
            return Ok(());
        }
        info!("[RTL8125] MTU {} -> {}", ctl.config.mtu, mtu);
        ctl.config.mtu = mtu;

        if self.enabled.load(Ordering::Acquire) {
            self.restart(ctl, "MTU change");
            irq.reset();
            irq.unmask(&self.regs);
        }
        Ok(())
    }

    /// Change the offloads the stack may request. Restarts the controller.
    pub fn set_offloads(&self, offloads: Offloads) {
        let mut core = self.core.lock();
        let Core { irq, ctl } = &mut *core;
        if ctl.config.offloads == offloads {
            return;
        }
        ctl.config.offloads = offloads;
        self.tx.set_offloads(offloads);

        if self.enabled.load(Ordering::Acquire) {
            self.restart(ctl, "offload change");
            irq.reset();
            irq.unmask(&self.regs);
        }
    }

    pub fn set_promiscuous(&self, enabled: bool) {
        let mut core = self.core.lock();
        if core.ctl.filter.promiscuous() == enabled {
            return;
        }
        info!("[RTL8125] promiscuous mode {}", enabled);
        core.ctl.filter.set_promiscuous(enabled);
        core.ctl.filter.program(&self.regs);
    }

    pub fn set_multicast_filter(&self, addrs: &[EthernetAddress]) {
        let mut core = self.core.lock();
        core.ctl.filter.set_multicast(addrs);
        if core.ctl.filter.accepts_all_multicast() && addrs.len() > MC_FILTER_LIMIT {
            debug!(
                "[RTL8125] {} multicast addresses, accepting all multicast",
                addrs.len()
            );
        }
        core.ctl.filter.program(&self.regs);
    }

    pub fn link_state(&self) -> LinkState {
        self.core.lock().ctl.link.state()
    }

    pub fn mac_address(&self) -> EthernetAddress {
        self.mac
    }

    pub fn config(&self) -> NicConfig {
        self.core.lock().ctl.config
    }

    pub fn statistics(&self) -> Statistics {
        let core = self.core.lock();
        let mut driver = core.ctl.counters;
        driver.tx_backpressure = self.tx_backpressure.load(Ordering::Relaxed);
        Statistics {
            driver,
            hardware: core.ctl.tally.snapshot(),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Interrupt entry point. Returns whether the interrupt was ours.
    pub fn on_interrupt(&self) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        if self.in_interrupt.swap(true, Ordering::Acquire) {
            return false;
        }

        let status = self.regs.read32(ISR0);
        let outcome = {
            let mut core = self.core.lock();
            let Core { irq, ctl } = &mut *core;
            let mut sink = Servicer { nic: self, ctl };
            irq.on_interrupt(&self.regs, status, &mut sink)
        };

        self.in_interrupt.store(false, Ordering::Release);
        outcome != InterruptOutcome::Spurious
    }

    /// Periodic timer entry point, every [`TIMER_PERIOD_MS`] while the link
    /// is up.
    pub fn on_timer(&self) {
        if !self.timer_armed.load(Ordering::Acquire) {
            return;
        }

        let mut core = self.core.lock();
        let Core { irq, ctl } = &mut *core;
        ctl.tally.refresh(&self.regs);

        let free = self.tx.free_count();
        let capacity = self.tx.capacity();
        match ctl.monitor.check(self.tx.done_count(), free, capacity) {
            WatchdogVerdict::Healthy => {}
            WatchdogVerdict::ForceReclaim => {
                warn!("[RTL8125] tx stalled, forcing reclaim");
                self.reclaim_tx(ctl);
            }
            WatchdogVerdict::Deadlocked => {
                error!(
                    "[RTL8125] tx deadlock: {} of {} descriptors stuck",
                    capacity - free,
                    capacity
                );
                ctl.counters.deadlock_resets += 1;
                self.restart(ctl, "transmit deadlock");
                irq.reset();
                irq.unmask(&self.regs);
            }
        }
    }

    /// Switch Rx/Tx servicing between interrupts and [`Self::poll_input`].
    pub fn set_poll_mode(&self, enabled: bool) {
        self.poll_mode.store(enabled, Ordering::Release);
        let mut core = self.core.lock();
        core.irq.set_poll_mode(enabled);
        if self.enabled.load(Ordering::Acquire) {
            self.regs.write32(TIMER_INT0, 0);
            core.irq.unmask(&self.regs);
        }
        debug!("[RTL8125] poll mode {}", enabled);
    }

    /// External poll in poll mode: up to `budget` frames, then a reclaim.
    pub fn poll_input(&self, budget: usize) -> usize {
        if !self.poll_mode.load(Ordering::Acquire) || !self.is_running() {
            return 0;
        }
        if self.polling.swap(true, Ordering::Acquire) {
            return 0;
        }
        let work = {
            let mut core = self.core.lock();
            self.service_rings(&mut core.ctl, budget)
        };
        self.polling.store(false, Ordering::Release);
        work.rx
    }

    fn poll_rings(&self, ctl: &mut Control, budget: usize) -> Option<RingWork> {
        if self.polling.swap(true, Ordering::Acquire) {
            return None;
        }
        let work = self.service_rings(ctl, budget);
        self.polling.store(false, Ordering::Release);
        Some(work)
    }

    fn service_rings(&self, ctl: &mut Control, budget: usize) -> RingWork {
        let stack = &self.stack;
        let rx = ctl
            .rx
            .poll(budget, &mut ctl.counters, |frame| stack.deliver_input(frame));
        if rx > 0 {
            stack.flush_input();
        }
        let tx = self.reclaim_tx(ctl);
        RingWork { rx, tx }
    }

    fn reclaim_tx(&self, ctl: &mut Control) -> TxReclaim {
        let result = self.tx.reclaim(&self.regs);
        ctl.counters.tx_descriptors += result.descriptors as u64;
        ctl.counters.tx_packets += result.packets as u64;
        if result.wake {
            self.stack.wake_output();
        }
        result
    }

    fn handle_link_change(&self, ctl: &mut Control) {
        let raw = self.regs.read16(PHYSTATUS);
        match ctl.link.on_phy_status(raw, self.chip.negotiated_eee()) {
            LinkTransition::Up(state) => self.set_link_up(ctl, state),
            LinkTransition::Down => self.set_link_down(ctl),
            LinkTransition::Unchanged => {}
        }
    }

    fn set_link_up(&self, ctl: &mut Control, state: LinkState) {
        let Some(speed) = state.speed else {
            return;
        };
        self.chip.setup_speed(speed);
        self.stack.configure_polling(PollParams::compute(
            speed,
            ctl.config.mtu,
            ctl.config.poll_interval_us,
        ));
        self.regs.write8(CMD, CMD_RE | CMD_TE);

        ctl.monitor.reset(self.tx.done_count());
        self.tx.open();
        self.running.store(true, Ordering::Release);
        self.timer_armed.store(true, Ordering::Release);

        self.stack.link_changed(&state);
        self.stack.start_output();
        info!(
            "[RTL8125] link up: {} Mbps {:?} duplex, flow control {:?}, EEE {:?}",
            speed.mbps(),
            state.duplex,
            state.flow_control,
            state.eee
        );
    }

    fn set_link_down(&self, ctl: &mut Control) {
        info!("[RTL8125] link down");
        self.quiesce(ctl);
        self.stack.link_changed(&ctl.link.state());
        self.chip.reset_phy();
        if let Err(err) = self.reset_hardware(ctl) {
            error!("[RTL8125] reset after link loss failed: {:?}", err);
            return;
        }
        if self.enabled.load(Ordering::Acquire) {
            ctl.link.begin_negotiation();
        }
    }

    /// Stop accepting work and mark the link down. Returns whether the link
    /// was up.
    fn quiesce(&self, ctl: &mut Control) -> bool {
        self.tx.close();
        self.running.store(false, Ordering::Release);
        self.timer_armed.store(false, Ordering::Release);
        self.stack.stop_output();
        self.stack.flush_output();
        self.regs.write8(CMD, 0);
        ctl.link.force_down()
    }

    /// Full controller reset. The caller restores the interrupt mask.
    fn restart(&self, ctl: &mut Control, reason: &str) {
        warn!("[RTL8125] resetting controller: {}", reason);
        ctl.counters.restarts += 1;

        if self.quiesce(ctl) {
            self.stack.link_changed(&ctl.link.state());
        }
        if let Err(err) = self.reset_hardware(ctl) {
            error!("[RTL8125] controller reset failed: {:?}", err);
            return;
        }
        if self.enabled.load(Ordering::Acquire) {
            ctl.link.begin_negotiation();
            self.handle_link_change(ctl);
        }
    }

    fn reset_hardware(&self, ctl: &mut Control) -> DriverResult {
        self.chip.reset_chip();
        self.clear_rings(ctl);
        ctl.monitor.reset(self.tx.done_count());
        ctl.tally.reset();
        self.reinit_hardware(ctl)
    }

    fn clear_rings(&self, ctl: &mut Control) {
        let released = self.tx.reset();
        ctl.rx.reset();
        self.regs.write16(SW_TAIL_PTR0, 0);
        debug!("[RTL8125] rings reset, {} pending packets released", released);
    }

    /// Chip init plus everything the core programs itself: ring bases,
    /// frame size, Rx/Tx configuration and the Rx filter.
    fn reinit_hardware(&self, ctl: &mut Control) -> DriverResult {
        self.chip.init_chip().context("Chip initialization failed")?;

        let regs = &self.regs;
        regs.write8(CFG_9346, CFG_9346_UNLOCK);

        let tx_base = self.tx.base().as_usize() as u64;
        regs.write32(TNPDS_LO, tx_base as u32);
        regs.write32(TNPDS_HI, (tx_base >> 32) as u32);
        let rx_base = ctl.rx.base().as_usize() as u64;
        regs.write32(RDSAR_LO, rx_base as u32);
        regs.write32(RDSAR_HI, (rx_base >> 32) as u32);

        regs.write16(RMS, ctl.config.max_frame_size() as u16);
        regs.write16(CPCMD, CPCMD_RX_CHKSUM | CPCMD_RX_VLAN);
        regs.write32(TCR, TCR_MXDMA_UNLIMITED | TCR_IFG_NORMAL);
        regs.write32(RCR, RCR_MXDMA_UNLIMITED | RCR_RXFTH_NONE);
        ctl.filter.program(regs);

        regs.write16(SW_TAIL_PTR0, 0);
        regs.write8(CFG_9346, CFG_9346_LOCK);

        debug!(
            "[RTL8125] rings at tx {:#x} rx {:#x}, max frame {}",
            tx_base,
            rx_base,
            ctl.config.max_frame_size()
        );
        Ok(())
    }
}

impl<R: RegisterPort, C: ChipOps, S: NetStack> Drop for Rtl8125<R, C, S> {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Interrupt-context view of the controller.
struct Servicer<'a, R: RegisterPort, C: ChipOps, S: NetStack> {
    nic: &'a Rtl8125<R, C, S>,
    ctl: &'a mut Control,
}

impl<R: RegisterPort, C: ChipOps, S: NetStack> InterruptSink for Servicer<'_, R, C, S> {
    fn fatal_error(&mut self) {
        self.ctl.counters.fatal_resets += 1;
        self.nic.restart(self.ctl, "system error");
    }

    fn service_rings(&mut self) -> Option<RingWork> {
        if !self.nic.is_running() {
            return Some(RingWork::default());
        }
        let budget = self.ctl.rx.capacity();
        self.nic.poll_rings(self.ctl, budget)
    }

    fn link_changed(&mut self) {
        self.nic.handle_link_change(self.ctl);
    }
}

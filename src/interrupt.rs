//! Interrupt dispatch and mitigation.
//!
//! After servicing the rings the coordinator picks one of three modes:
//! plain per-packet interrupts (`RxTx`), the hardware mitigation timer
//! (`Timer`) while traffic keeps arriving, or `Poll` when the stack polls
//! for input itself. System error and link change stay unmasked in every
//! mode.

use crate::common::RegisterPort;
use crate::config::INTR_TIMER_VALUE;
use crate::regs::intr::*;
use crate::regs::mac::{IMR0, ISR0, TIMER_INT0};
use crate::tx::TxReclaim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MitigationMode {
    #[default]
    RxTx,
    Timer,
    Poll,
}

impl MitigationMode {
    pub fn mask(self) -> u32 {
        match self {
            Self::RxTx => MASK_RXTX,
            Self::Timer => MASK_TIMER,
            Self::Poll => MASK_POLL,
        }
    }
}

/// Work done by one ring service pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingWork {
    pub rx: usize,
    pub tx: TxReclaim,
}

impl RingWork {
    pub fn did_work(&self) -> bool {
        self.rx > 0 || self.tx.did_work()
    }
}

/// The controller side of interrupt handling.
pub trait InterruptSink {
    /// A system error was reported; reset the controller.
    fn fatal_error(&mut self);
    /// Poll Rx and reclaim Tx. `None` if a poll is already in progress.
    fn service_rings(&mut self) -> Option<RingWork>;
    /// Re-read the PHY and run the link state machine.
    fn link_changed(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Status was zero or all-ones; not ours, or the device is gone.
    Spurious,
    /// System error; the controller was reset.
    Fatal,
    Handled,
}

#[derive(Debug, Default)]
pub struct InterruptCoordinator {
    mode: MitigationMode,
    poll_mode: bool,
    /// Consecutive interrupts serviced with the mitigation timer armed.
    keep_interrupting: u32,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn mode(&self) -> MitigationMode {
        self.mode
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mode.mask()
    }

    #[inline]
    pub fn keep_interrupting(&self) -> u32 {
        self.keep_interrupting
    }

    /// Write the current mode's mask.
    pub fn unmask(&self, regs: &dyn RegisterPort) {
        regs.write32(IMR0, self.mask());
    }

    /// Mask and acknowledge everything.
    pub fn mask_all(&self, regs: &dyn RegisterPort) {
        regs.write32(IMR0, 0);
        regs.write32(ISR0, u32::MAX);
        regs.write32(TIMER_INT0, 0);
    }

    /// Back to the initial mode after a controller reset.
    pub fn reset(&mut self) {
        self.mode = if self.poll_mode {
            MitigationMode::Poll
        } else {
            MitigationMode::RxTx
        };
        self.keep_interrupting = 0;
    }

    pub fn on_interrupt(
        &mut self,
        regs: &dyn RegisterPort,
        status: u32,
        sink: &mut dyn InterruptSink,
    ) -> InterruptOutcome {
        if status == 0 || status == u32::MAX {
            return InterruptOutcome::Spurious;
        }

        regs.write32(IMR0, 0);
        // FIFO overflow stays latched until the Rx ring has been drained.
        regs.write32(ISR0, status & !FOVW);

        if status & SERR != 0 {
            error!("[RTL8125] system error, status {:#x}", status);
            sink.fatal_error();
            self.reset();
            self.unmask(regs);
            return InterruptOutcome::Fatal;
        }

        if !self.poll_mode {
            match sink.service_rings() {
                Some(work) if work.did_work() => {
                    regs.write32(TIMER_INT0, INTR_TIMER_VALUE);
                    self.mode = MitigationMode::Timer;
                    self.keep_interrupting += 1;
                }
                Some(_) => {
                    regs.write32(TIMER_INT0, 0);
                    self.mode = MitigationMode::RxTx;
                    self.keep_interrupting = 0;
                }
                None => {}
            }
        }

        if status & LINKCHG != 0 {
            sink.link_changed();
        }

        self.unmask(regs);
        InterruptOutcome::Handled
    }

    /// Hand Rx/Tx servicing to an external poller, or take it back.
    ///
    /// Takes effect on the hardware with the next [`Self::unmask`].
    pub fn set_poll_mode(&mut self, enabled: bool) {
        self.poll_mode = enabled;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRegs;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        work: Option<RingWork>,
        calls: Vec<&'static str>,
    }

    impl InterruptSink for Recorder {
        fn fatal_error(&mut self) {
            self.calls.push("fatal");
        }

        fn service_rings(&mut self) -> Option<RingWork> {
            self.calls.push("rings");
            self.work
        }

        fn link_changed(&mut self) {
            self.calls.push("link");
        }
    }

    fn busy() -> Option<RingWork> {
        Some(RingWork {
            rx: 3,
            ..RingWork::default()
        })
    }

    #[test]
    fn test_spurious_status_is_ignored() {
        let regs = FakeRegs::new();
        let mut irq = InterruptCoordinator::new();
        let mut sink = Recorder::default();
        for status in [0, u32::MAX] {
            assert_eq!(
                irq.on_interrupt(&regs, status, &mut sink),
                InterruptOutcome::Spurious
            );
        }
        assert!(sink.calls.is_empty());
        assert!(regs.writes_to(IMR0).is_empty());
    }

    #[test]
    fn test_work_arms_timer_and_idle_disarms() {
        let regs = FakeRegs::new();
        let mut irq = InterruptCoordinator::new();
        let mut sink = Recorder {
            work: busy(),
            ..Recorder::default()
        };

        irq.on_interrupt(&regs, ROK, &mut sink);
        assert_eq!(irq.mode(), MitigationMode::Timer);
        assert_eq!(regs.read32(TIMER_INT0), INTR_TIMER_VALUE);
        assert_eq!(regs.read32(IMR0), MASK_TIMER);

        irq.on_interrupt(&regs, PCS_TIMEOUT, &mut sink);
        assert_eq!(irq.keep_interrupting(), 2);

        sink.work = Some(RingWork::default());
        irq.on_interrupt(&regs, PCS_TIMEOUT, &mut sink);
        assert_eq!(irq.mode(), MitigationMode::RxTx);
        assert_eq!(irq.keep_interrupting(), 0);
        assert_eq!(regs.read32(TIMER_INT0), 0);
        assert_eq!(regs.read32(IMR0), MASK_RXTX);
    }

    #[test]
    fn test_acknowledge_keeps_fifo_overflow() {
        let regs = FakeRegs::new();
        let mut irq = InterruptCoordinator::new();
        let mut sink = Recorder::default();
        regs.raise(ROK | FOVW);
        irq.on_interrupt(&regs, ROK | FOVW, &mut sink);
        assert_eq!(regs.read32(ISR0), FOVW);
        assert_eq!(regs.writes_to(IMR0).first(), Some(&0));
    }

    #[test]
    fn test_system_error_resets_before_anything_else() {
        let regs = FakeRegs::new();
        let mut irq = InterruptCoordinator::new();
        let mut sink = Recorder {
            work: busy(),
            ..Recorder::default()
        };
        irq.on_interrupt(&regs, ROK, &mut sink);

        let outcome = irq.on_interrupt(&regs, SERR | LINKCHG | ROK, &mut sink);
        assert_eq!(outcome, InterruptOutcome::Fatal);
        assert_eq!(sink.calls, ["rings", "fatal"]);
        assert_eq!(irq.mode(), MitigationMode::RxTx);
        assert_eq!(regs.read32(IMR0), MASK_RXTX);
    }

    #[test]
    fn test_link_change_runs_in_every_mode() {
        let regs = FakeRegs::new();
        let mut irq = InterruptCoordinator::new();
        let mut sink = Recorder::default();

        irq.set_poll_mode(true);
        irq.unmask(&regs);
        assert_eq!(irq.mode(), MitigationMode::Poll);
        assert_eq!(regs.read32(IMR0), MASK_POLL);
        irq.on_interrupt(&regs, LINKCHG, &mut sink);
        assert_eq!(sink.calls, ["link"]);
        assert_eq!(regs.read32(IMR0), MASK_POLL);

        irq.set_poll_mode(false);
        sink.work = Some(RingWork::default());
        irq.on_interrupt(&regs, LINKCHG, &mut sink);
        assert_eq!(sink.calls, ["link", "rings", "link"]);
    }

    #[test]
    fn test_busy_poller_leaves_mode_alone() {
        let regs = FakeRegs::new();
        let mut irq = InterruptCoordinator::new();
        let mut sink = Recorder {
            work: busy(),
            ..Recorder::default()
        };
        irq.on_interrupt(&regs, ROK, &mut sink);
        sink.work = None;
        irq.on_interrupt(&regs, TOK, &mut sink);
        assert_eq!(irq.mode(), MitigationMode::Timer);
        assert_eq!(irq.keep_interrupting(), 1);
    }
}

//! Link state machine.
//!
//! `Down -> Negotiating -> Up`, back to `Down` on loss or teardown. The
//! machine only decides transitions; the controller runs the side effects.

use bitflags::bitflags;
use tock_registers::LocalRegisterCopy;

use crate::config::ETH_OVERHEAD;
use crate::regs::phy::PhyStatus;

bitflags! {
    /// Energy Efficient Ethernet speeds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EeeMode: u8 {
        const MBPS100 = 1 << 0;
        const MBPS1000 = 1 << 1;
        const MBPS2500 = 1 << 2;
    }
}

bitflags! {
    /// Pause frames in use on the current link.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlowControl: u8 {
        const RX = 1 << 0;
        const TX = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    #[default]
    Down,
    Negotiating,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Mbps10,
    Mbps100,
    Mbps1000,
    Mbps2500,
}

impl LinkSpeed {
    pub fn mbps(self) -> u32 {
        match self {
            Self::Mbps10 => 10,
            Self::Mbps100 => 100,
            Self::Mbps1000 => 1000,
            Self::Mbps2500 => 2500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplex {
    #[default]
    Half,
    Full,
}

/// Immutable snapshot of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub phase: LinkPhase,
    /// `None` unless the link is up.
    pub speed: Option<LinkSpeed>,
    pub duplex: Duplex,
    pub flow_control: FlowControl,
    pub eee: EeeMode,
}

impl LinkState {
    pub const DOWN: Self = Self {
        phase: LinkPhase::Down,
        speed: None,
        duplex: Duplex::Half,
        flow_control: FlowControl::empty(),
        eee: EeeMode::empty(),
    };

    #[inline]
    pub fn is_up(&self) -> bool {
        self.phase == LinkPhase::Up
    }
}

/// What the controller has to do after a PHY status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// Run the full link-up sequence with this state.
    Up(LinkState),
    /// Tear the link down.
    Down,
    Unchanged,
}

pub struct LinkStateMachine {
    state: LinkState,
    eee_allowed: EeeMode,
}

impl LinkStateMachine {
    pub fn new(eee_allowed: EeeMode) -> Self {
        Self {
            state: LinkState::DOWN,
            eee_allowed,
        }
    }

    #[inline]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[inline]
    pub fn phase(&self) -> LinkPhase {
        self.state.phase
    }

    /// Interface enabled, or a torn-down link waiting for the partner again.
    pub fn begin_negotiation(&mut self) {
        if self.state.phase == LinkPhase::Down {
            self.state.phase = LinkPhase::Negotiating;
        }
    }

    /// Drop to `Down` from any phase. Returns whether the link was up.
    pub fn force_down(&mut self) -> bool {
        let was_up = self.state.is_up();
        self.state = LinkState::DOWN;
        was_up
    }

    /// Feed a raw PHYSTATUS value and the partner's EEE report.
    pub fn on_phy_status(&mut self, raw: u16, partner_eee: EeeMode) -> LinkTransition {
        let status = LocalRegisterCopy::<u16, PhyStatus::Register>::new(raw);

        if !status.is_set(PhyStatus::LINK_STS) {
            return match self.state.phase {
                LinkPhase::Up => {
                    self.state = LinkState::DOWN;
                    LinkTransition::Down
                }
                LinkPhase::Negotiating | LinkPhase::Down => LinkTransition::Unchanged,
            };
        }

        if self.state.phase == LinkPhase::Down {
            // Interface not enabled; nothing may come up.
            return LinkTransition::Unchanged;
        }

        let Some(speed) = decode_speed(status) else {
            warn!("[RTL8125] link reported without a speed: {:#06x}", raw);
            return LinkTransition::Unchanged;
        };
        let duplex = if matches!(speed, LinkSpeed::Mbps1000 | LinkSpeed::Mbps2500)
            || status.is_set(PhyStatus::FULL_DUP)
        {
            Duplex::Full
        } else {
            Duplex::Half
        };
        let mut flow_control = FlowControl::empty();
        if status.is_set(PhyStatus::RX_FLOW_CTRL) {
            flow_control |= FlowControl::RX;
        }
        if status.is_set(PhyStatus::TX_FLOW_CTRL) {
            flow_control |= FlowControl::TX;
        }

        self.state = LinkState {
            phase: LinkPhase::Up,
            speed: Some(speed),
            duplex,
            flow_control,
            eee: partner_eee & self.eee_allowed,
        };
        LinkTransition::Up(self.state)
    }
}

fn decode_speed(status: LocalRegisterCopy<u16, PhyStatus::Register>) -> Option<LinkSpeed> {
    if status.is_set(PhyStatus::SPEED_2500F) {
        Some(LinkSpeed::Mbps2500)
    } else if status.is_set(PhyStatus::SPEED_1000F) {
        Some(LinkSpeed::Mbps1000)
    } else if status.is_set(PhyStatus::SPEED_100) {
        Some(LinkSpeed::Mbps100)
    } else if status.is_set(PhyStatus::SPEED_10) {
        Some(LinkSpeed::Mbps10)
    } else {
        None
    }
}

/// Frames handled per input poll.
pub const POLL_BUDGET: usize = 64;
const POLL_MIN_INTERVAL_US: u32 = 50;
const POLL_MAX_INTERVAL_US: u32 = 1000;
/// Preamble, start delimiter and inter-frame gap.
const WIRE_GAP_BYTES: u64 = 20;

/// How often, and how much, the stack should poll for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollParams {
    pub interval_us: u32,
    pub budget: usize,
}

impl PollParams {
    /// The interval is the time one budget of full-size frames takes on the
    /// wire, so a poll never finds more than a budget's worth waiting.
    pub fn compute(speed: LinkSpeed, mtu: u32, interval_override_us: u32) -> Self {
        if interval_override_us != 0 {
            return Self {
                interval_us: interval_override_us,
                budget: POLL_BUDGET,
            };
        }
        let frame_bits = (mtu as u64 + ETH_OVERHEAD as u64 + WIRE_GAP_BYTES) * 8;
        let frame_ns = frame_bits * 1000 / speed.mbps() as u64;
        let interval = (frame_ns * POLL_BUDGET as u64 / 1000)
            .clamp(POLL_MIN_INTERVAL_US as u64, POLL_MAX_INTERVAL_US as u64);
        Self {
            interval_us: interval as u32,
            budget: POLL_BUDGET,
        }
    }
}

//! Driver core for the Realtek RTL8125 2.5GbE controller.
//!
//! The core owns the descriptor rings, interrupt mitigation, the link state
//! machine and recovery. The embedding kernel supplies register access
//! ([`RegisterPort`]), DMA memory ([`KernelFunc`]), the vendor bring-up
//! sequences ([`ChipOps`]) and the network stack ([`NetStack`]).

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

mod common;
pub mod config;
mod device;
mod error;
pub mod filter;
pub mod interrupt;
mod kernel_func;
pub mod link;
pub mod regs;
pub mod ring;
pub mod rx;
mod stack;
pub mod stats;
mod sync;
pub mod tx;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use common::{DmaBuffer, EthernetAddress, MmioOps, RealtekCommon, RegisterPort};
pub use config::{NicConfig, Offloads};
pub use device::Rtl8125;
pub use error::{DriverResult, NicError, NicResult, SubmitError};
pub use kernel_func::{ChipOps, KernelFunc};
pub use link::{Duplex, EeeMode, FlowControl, LinkPhase, LinkSpeed, LinkState, PollParams};
pub use rx::{ChecksumValidity, RxFrame, RxPayload};
pub use stack::NetStack;
pub use stats::{Counters, Statistics, TallyCounters};
pub use tx::{ChecksumKind, Offload, OutboundPacket, SegmentationKind, TxSegment};

//! Error types for the RTL8125 driver core.
//!
//! Lifecycle paths (activation, enable, restart) use anyhow for flexible
//! error handling in a no_std environment: every step attaches context so a
//! failed bring-up reports which allocation or hardware step broke.
//!
//! Operation paths that a caller is expected to react to return typed errors
//! instead, so backpressure can be told apart from a misconfiguration.
//!
//! ## Usage Examples
//!
//! ```ignore
//! let tx = TxEngine::new(&kf, config.tx_ring_size, config.tx_spare_descs, config.offloads)
//!     .context("Failed to allocate tx ring")?;
//!
//! anyhow::ensure!(config.rx_ring_size > 1, "rx ring too small");
//! ```

use core::fmt;

use crate::tx::OutboundPacket;

/// Result type alias using anyhow::Error.
pub type DriverResult<T = ()> = anyhow::Result<T>;

/// Result type for driver operations with a typed error.
pub type NicResult<T = ()> = Result<T, NicError>;

/// Errors reported by driver operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicError {
    /// The requested MTU is outside the range the posted buffers can hold.
    InvalidMtu(u32),
    /// A ring size that is not a power of two, or too small to be useful.
    InvalidRingSize(usize),
    /// A DMA allocation failed.
    NoMemory,
    /// The hardware did not answer within the allotted time.
    Timeout,
}

impl fmt::Display for NicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMtu(mtu) => write!(f, "invalid MTU {mtu}"),
            Self::InvalidRingSize(size) => write!(f, "invalid ring size {size}"),
            Self::NoMemory => write!(f, "out of DMA memory"),
            Self::Timeout => write!(f, "hardware timeout"),
        }
    }
}

impl core::error::Error for NicError {}

/// Why a packet was not accepted for transmission.
///
/// The packet is always handed back so the caller can hold it and retry.
pub enum SubmitError<P> {
    /// Not enough free descriptors. Retry after the next reclaim.
    NoResources(OutboundPacket<P>),
    /// The interface is down or being reset.
    LinkDown(OutboundPacket<P>),
    /// The segment list or offload request cannot be expressed in descriptors.
    Invalid(OutboundPacket<P>),
}

impl<P> SubmitError<P> {
    /// Take the rejected packet back.
    pub fn into_packet(self) -> OutboundPacket<P> {
        match self {
            Self::NoResources(p) | Self::LinkDown(p) | Self::Invalid(p) => p,
        }
    }

    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::NoResources(_))
    }
}

impl<P> fmt::Debug for SubmitError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResources(p) => write!(f, "NoResources({} segments)", p.segments.len()),
            Self::LinkDown(_) => write!(f, "LinkDown"),
            Self::Invalid(p) => write!(f, "Invalid({} segments)", p.segments.len()),
        }
    }
}

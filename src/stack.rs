//! The network stack the driver feeds.

use crate::link::{LinkState, PollParams};
use crate::rx::RxFrame;
use crate::tx::OutboundPacket;

/// Upper-layer hooks.
///
/// Every method may be called from interrupt, timer or submission context
/// and must not call back into the controller.
pub trait NetStack: Send + Sync {
    /// Opaque packet handle, released by dropping it once transmitted.
    type Packet: Send;

    /// Next packet waiting for transmission.
    fn dequeue_output(&self) -> Option<OutboundPacket<Self::Packet>>;
    /// Put back a packet the ring could not take yet.
    fn requeue_output(&self, packet: OutboundPacket<Self::Packet>);

    fn deliver_input(&self, frame: RxFrame);
    /// End of a batch of [`NetStack::deliver_input`] calls.
    fn flush_input(&self) {}

    /// Link is up; output may flow.
    fn start_output(&self);
    /// Link is going down; hold output.
    fn stop_output(&self);
    /// Drop every queued, unsent packet.
    fn flush_output(&self);
    /// Descriptors freed up after backpressure.
    fn wake_output(&self);

    fn link_changed(&self, state: &LinkState);
    fn configure_polling(&self, params: PollParams);
}

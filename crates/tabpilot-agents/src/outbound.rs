use tabpilot_common::Message;

/// Fire-and-forget delivery to the connected peer. Messages sent while no peer is
/// connected are dropped.
pub trait Outbound: Send + Sync {
    fn send(&self, message: Message);
}

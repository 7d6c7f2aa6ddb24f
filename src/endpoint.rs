use crate::address::Address;

/// Outbound representation of a message handed to an endpoint. The wire
/// format beyond these fields is endpoint-defined.
pub struct WireMessage<'a> {
    /// Raw payload bytes of the message.
    pub data: &'a [u8],
    /// Address of the sending mailbox.
    pub from: Address,
}

/// A network endpoint able to carry messages between hosts.
///
/// The runtime treats endpoints as black-box sinks. Sends addressed by a name
/// that is not registered locally are handed to [`send`](Endpoint::send);
/// inbound traffic re-enters the runtime through
/// [`Framework::deliver`](crate::Framework::deliver) once the endpoint has
/// decoded it.
pub trait Endpoint: Send + Sync + 'static {
    /// Forwards a message towards the named remote mailbox. Returning false
    /// reports the message as undeliverable and runs the sending framework's
    /// fallback handler.
    fn send(&self, message: WireMessage<'_>, to: &Address) -> bool;
}

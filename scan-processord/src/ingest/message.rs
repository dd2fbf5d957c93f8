/// A delivered message waiting for its disposition.
///
/// `ack` and `nack` take the message by value, so a message can be settled
/// only once.
pub trait Delivery: Send {
    /// Opaque message body
    fn payload(&self) -> &[u8];

    /// Handled; the transport must not redeliver
    fn ack(self);

    /// Not handled; the transport may redeliver
    fn nack(self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

impl Disposition {
    /// Settle the message
    pub fn apply<M: Delivery>(self, message: M) {
        match self {
            Disposition::Ack => message.ack(),
            Disposition::Nack => message.nack(),
        }
    }
}

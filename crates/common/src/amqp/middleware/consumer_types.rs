use bytes::Bytes;

/// Request type for consuming a single queue delivery through Tower.
///
/// This owns all the delivery data, allowing it to be passed through
/// Tower middleware layers without lifetime concerns.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    /// The queue the delivery came from
    pub queue: String,
    /// Broker-assigned tag used to ack or reject this delivery
    pub delivery_tag: u64,
    /// Set by the broker when this delivery was handed out before
    pub redelivered: bool,
    /// The message body
    pub payload: Bytes,
}

impl ConsumeRequest {
    pub fn new(queue: String, delivery_tag: u64, redelivered: bool, payload: Bytes) -> Self {
        Self {
            queue,
            delivery_tag,
            redelivered,
            payload,
        }
    }
}

/// Response type for message consumption.
///
/// Indicates whether the delivery should be acknowledged or rejected.
/// Rejection never requeues: the broker drops the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Message was handled - acknowledge it
    Ack,
    /// Message cannot be handled - reject it without requeue
    Reject(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(Some(reason.into()))
    }

    pub fn reject_no_reason() -> Self {
        Self::Reject(None)
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}

//! Inbound delivery extracted from a vendor webhook payload.

/// A text message from an end user, ready for the inbound gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDelivery {
    pub sender_id: String,
    /// Vendor message id; the idempotency key within one bot identity.
    pub external_message_id: String,
    pub text: String,
}

/// Result of parsing a webhook body. Anything that is not a user text message is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInbound {
    Text(InboundDelivery),
    NotText,
}

//! Messaging channels (Telegram, WhatsApp Cloud API).
//!
//! Each vendor module parses its webhook payload into an [`InboundDelivery`] and implements
//! [`Transport`] for replies. The gateway looks transports up by [`ChannelKind`](crate::identity::ChannelKind).

mod inbound;
mod registry;
mod telegram;
mod whatsapp;

pub use inbound::{InboundDelivery, ParsedInbound};
pub use registry::{Transport, TransportError, TransportRegistry};
pub use telegram::{telegram_api_base, TelegramTransport, TelegramUpdate};
pub use whatsapp::{whatsapp_api_base, WhatsAppPayload, WhatsAppTransport};

//! Delivery gateway: the seam request handlers use to fan events out to
//! connected clients.
//!
//! Callers must commit their durable write before calling any of these
//! methods. Delivery is at-most-once; a missed event is recovered by the
//! client refetching over REST.

use super::hub::HubHandle;
use super::protocol::{ChatCreated, MessageRead, NewMessage, ServerEvent, Typing};

pub trait DeliveryGateway: Send + Sync {
    /// Deliver `event` to every live connection.
    fn deliver(&self, event: ServerEvent);

    fn new_message(&self, message: NewMessage) {
        self.deliver(ServerEvent::NewMessage(message));
    }

    fn chat_created(&self, chat: ChatCreated) {
        self.deliver(ServerEvent::ChatCreated(chat));
    }

    fn message_read(&self, receipt: MessageRead) {
        self.deliver(ServerEvent::MessageRead(receipt));
    }

    fn typing_start(&self, chat_id: &str, user_id: &str) {
        self.deliver(ServerEvent::TypingStart(Typing::now(chat_id, user_id)));
    }

    fn typing_end(&self, chat_id: &str, user_id: &str) {
        self.deliver(ServerEvent::TypingEnd(Typing::now(chat_id, user_id)));
    }
}

impl DeliveryGateway for HubHandle {
    fn deliver(&self, event: ServerEvent) {
        tracing::debug!(
            kind = event.kind(),
            clients = self.connected_count(),
            "Broadcasting event"
        );
        self.broadcast(&event);
    }
}

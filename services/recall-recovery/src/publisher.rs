use crate::codec::{NvfixMessage, SOH};
use crate::model::{Order, RecallTicket};

/// Seam to the messaging client. Recovery publishes republished tickets and
/// compensating DFD requests through this; transports implement it.
pub trait OutboundClient {
    fn publish(&mut self, topic: &str, key: &str, payload: &str) -> Result<(), String>;
}

/// JSON payload for a ticket republish.
pub fn ticket_payload(ticket: &RecallTicket) -> Result<String, serde_json::Error> {
    serde_json::to_string(ticket)
}

/// NVFIX payload for a compensating done-for-day request: the rebuilt order
/// plus the event token.
pub fn dfd_request(order: &Order) -> String {
    let mut payload = order.to_nvfix();
    payload.push(SOH);
    payload.push_str("event=DoneOfDay");
    payload
}

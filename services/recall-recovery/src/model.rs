use serde::{Deserialize, Serialize};

/// States a rebuilt order can occupy. Ticket states are open strings; the
/// order side of the comparison is this closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
pub enum OrderState {
    #[default]
    New,
    PendingNew,
    PendingReplace,
    PendingFill,
    PendingCancel,
    Filled,
    PartiallyFilled,
    Canceled,
    DoneOfDay,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::New => "New",
            OrderState::PendingNew => "PendingNew",
            OrderState::PendingReplace => "PendingReplace",
            OrderState::PendingFill => "PendingFill",
            OrderState::PendingCancel => "PendingCancel",
            OrderState::Filled => "Filled",
            OrderState::PartiallyFilled => "PartiallyFilled",
            OrderState::Canceled => "Canceled",
            OrderState::DoneOfDay => "DoneOfDay",
        }
    }

    pub fn parse(value: &str) -> Option<OrderState> {
        match value {
            "New" => Some(OrderState::New),
            "PendingNew" => Some(OrderState::PendingNew),
            "PendingReplace" => Some(OrderState::PendingReplace),
            "PendingFill" => Some(OrderState::PendingFill),
            "PendingCancel" => Some(OrderState::PendingCancel),
            "Filled" => Some(OrderState::Filled),
            "PartiallyFilled" => Some(OrderState::PartiallyFilled),
            "Canceled" => Some(OrderState::Canceled),
            "DoneOfDay" => Some(OrderState::DoneOfDay),
            _ => None,
        }
    }

    /// Member of the final-fill-or-cancel set.
    pub fn is_final_fill_or_cancel(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::PartiallyFilled | OrderState::Canceled
        )
    }
}

/// Ticket-vocabulary membership of the final-fill-or-cancel set.
pub fn is_final_ticket_state(state: &str) -> bool {
    matches!(state, "Filled" | "PartiallyFilled" | "Canceled")
}

/// Ticket-vocabulary membership of the pending set.
pub fn is_pending_ticket_state(state: &str) -> bool {
    matches!(
        state,
        "PendingNew" | "PendingReplace" | "PendingFill" | "PendingCancel"
    )
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecallTicket {
    pub id: String,
    pub current_state: String,
    pub recall_qty: u64,
    pub fill_qty: u64,
    pub fill_price: f64,
    pub effective_date: String,
    pub currency: String,
    pub ticker: String,
    pub fund: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    pub order_id: String,
    pub current_state: OrderState,
    pub ord_qty: u64,
    pub fill_qty: u64,
    pub fill_request: Option<ExecutionReport>,
    pub amend_request: Option<AmendRequest>,
    pub symbol: String,
    pub account: String,
    pub currency: String,
    pub side: String,
}

impl Order {
    /// Seeds an order from its ticket. Tickets without an identity cannot
    /// produce an order.
    pub fn from_ticket(ticket: &RecallTicket) -> Option<Order> {
        if ticket.id.is_empty() {
            return None;
        }
        Some(Order {
            order_id: ticket.id.clone(),
            current_state: OrderState::New,
            ord_qty: ticket.recall_qty,
            fill_qty: ticket.fill_qty,
            fill_request: None,
            amend_request: None,
            symbol: ticket.ticker.clone(),
            account: ticket.fund.clone(),
            currency: ticket.currency.clone(),
            side: String::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionReport {
    #[serde(rename = "execID")]
    pub exec_id: String,
    pub exec_type: Option<char>,
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: String,
    #[serde(rename = "origClOrdID")]
    pub orig_cl_ord_id: String,
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub last_qty: u64,
    pub cum_qty: u64,
    pub leaves_qty: u64,
    pub last_price: f64,
    pub avg_price: f64,
    pub order_state: String,
    pub transact_time: String,
    pub sending_time: String,
    pub side: String,
    pub symbol: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AmendRequest {
    pub order_qty: u64,
    pub price: f64,
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: String,
    #[serde(rename = "origClOrdID")]
    pub orig_cl_ord_id: String,
}

/// Payload carried by a transaction-log entry. The rebuilder dispatches on
/// the tag; accessors return `None` on a tag mismatch, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Ticket(RecallTicket),
    Order(Order),
    ExecReport(ExecutionReport),
}

impl LogPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            LogPayload::Ticket(_) => "Ticket",
            LogPayload::Order(_) => "Order",
            LogPayload::ExecReport(_) => "ExecReport",
        }
    }

    pub fn ticket(&self) -> Option<&RecallTicket> {
        match self {
            LogPayload::Ticket(t) => Some(t),
            _ => None,
        }
    }

    pub fn order(&self) -> Option<&Order> {
        match self {
            LogPayload::Order(o) => Some(o),
            _ => None,
        }
    }

    pub fn exec_report(&self) -> Option<&ExecutionReport> {
        match self {
            LogPayload::ExecReport(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_state_round_trips_through_strings() {
        for state in [
            OrderState::New,
            OrderState::PendingNew,
            OrderState::PendingReplace,
            OrderState::PendingFill,
            OrderState::PendingCancel,
            OrderState::Filled,
            OrderState::PartiallyFilled,
            OrderState::Canceled,
            OrderState::DoneOfDay,
        ] {
            assert_eq!(OrderState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OrderState::parse("DoneForDay"), None);
    }

    #[test]
    fn order_seeded_from_ticket_copies_defaults() {
        let ticket = RecallTicket {
            id: "R-1".to_string(),
            current_state: "Created".to_string(),
            recall_qty: 250,
            fill_qty: 10,
            currency: "USD".to_string(),
            ticker: "ACME".to_string(),
            fund: "FUND-7".to_string(),
            ..RecallTicket::default()
        };
        let order = Order::from_ticket(&ticket).unwrap();
        assert_eq!(order.order_id, "R-1");
        assert_eq!(order.current_state, OrderState::New);
        assert_eq!(order.ord_qty, 250);
        assert_eq!(order.symbol, "ACME");
        assert_eq!(order.account, "FUND-7");
        assert_eq!(order.currency, "USD");
    }

    #[test]
    fn order_cannot_be_seeded_without_identity() {
        assert!(Order::from_ticket(&RecallTicket::default()).is_none());
    }

    #[test]
    fn payload_accessors_are_tag_checked() {
        let payload = LogPayload::Order(Order::default());
        assert!(payload.order().is_some());
        assert!(payload.ticket().is_none());
        assert!(payload.exec_report().is_none());
        assert_eq!(payload.kind(), "Order");
    }
}

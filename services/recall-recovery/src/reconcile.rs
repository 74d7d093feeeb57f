use crate::journal::TransactionLogEntry;
use crate::model::{
    is_final_ticket_state, is_pending_ticket_state, Order, OrderState, RecallTicket,
};

/// Absolute tolerance for average-price comparison.
pub const PRICE_TOLERANCE: f64 = 1e-4;

/// Outcome of comparing a rebuilt order against its last observed ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Rebuild,
    Republish,
    Ignore,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Rebuild => "REBUILD",
            RecoveryAction::Republish => "REPUBLISH",
            RecoveryAction::Ignore => "IGNORE",
        }
    }
}

/// Per-order bundle assembled by the driver: the replayed entries split by
/// stream, the decoded ticket, and the rebuilt order, plus the scratch flags
/// the comparator sets.
#[derive(Debug, Default)]
pub struct RecoveryContext {
    pub order_id: String,
    pub ticket: Option<RecallTicket>,
    pub ticket_history_entries: Vec<TransactionLogEntry>,
    pub oms_entries: Vec<TransactionLogEntry>,
    pub latest_history_entry: Option<TransactionLogEntry>,
    pub latest_recall_to_oms: Option<TransactionLogEntry>,
    pub latest_oms_to_recall: Option<TransactionLogEntry>,
    pub rebuilt_order: Option<Order>,
    pub needs_dfd_request: bool,
    pub force_ticket_state_update: bool,
    /// Ticket state before the comparator overwrote it, kept for the audit
    /// log the driver emits.
    pub previous_ticket_state: Option<String>,
}

/// Decides how to recover one order. Mutates only the ticket's
/// `current_state` and the context flags, in the explicit cases below.
pub fn reconcile(ctx: &mut RecoveryContext) -> RecoveryAction {
    let (Some(order), Some(ticket)) = (&ctx.rebuilt_order, &mut ctx.ticket) else {
        return RecoveryAction::Ignore;
    };
    let order_state = order.current_state;
    let ticket_state = ticket.current_state.clone();

    if states_equivalent(order_state, &ticket_state) {
        if order_state.is_final_fill_or_cancel() && is_final_ticket_state(&ticket_state) {
            ctx.needs_dfd_request = true;
        }
        return RecoveryAction::Rebuild;
    }

    if order_state.is_final_fill_or_cancel() && is_final_ticket_state(&ticket_state) {
        ctx.needs_dfd_request = true;
        return RecoveryAction::Rebuild;
    }

    if is_pending_ticket_state(&ticket_state) && order_state.as_str() != ticket_state {
        ctx.previous_ticket_state = Some(ticket_state);
        ticket.current_state = order_state.as_str().to_string();
        if quantities_and_price_match(order, ticket) {
            ctx.force_ticket_state_update = true;
            return RecoveryAction::Rebuild;
        }
        return RecoveryAction::Republish;
    }

    RecoveryAction::Republish
}

/// Order/ticket state equivalence across the two vocabularies.
fn states_equivalent(order_state: OrderState, ticket_state: &str) -> bool {
    if order_state.as_str() == ticket_state {
        return true;
    }
    if order_state == OrderState::New && ticket_state == "Created" {
        return true;
    }
    order_state == OrderState::DoneOfDay && is_final_ticket_state(ticket_state)
}

fn quantities_and_price_match(order: &Order, ticket: &RecallTicket) -> bool {
    let cum_qty = order
        .fill_request
        .as_ref()
        .map(|fill| fill.cum_qty)
        .unwrap_or(0);
    let avg_price = order
        .fill_request
        .as_ref()
        .map(|fill| fill.avg_price)
        .unwrap_or(0.0);
    order.ord_qty == ticket.recall_qty
        && cum_qty == ticket.fill_qty
        && (avg_price - ticket.fill_price).abs() < PRICE_TOLERANCE
}

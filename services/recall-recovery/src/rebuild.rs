use crate::journal::TransactionLogEntry;
use crate::model::{AmendRequest, ExecutionReport, LogPayload, Order, OrderState, RecallTicket};
use crate::recovery::RecoveryConfig;
use tracing::warn;
use uuid::Uuid;

/// Rebuilds the current order for a ticket by folding its OMS entries in
/// chronological order. `None` means the ticket cannot produce an order;
/// callers treat that as IGNORE.
pub fn rebuild_order(
    ticket: &RecallTicket,
    oms_entries: &[TransactionLogEntry],
    cfg: &RecoveryConfig,
) -> Option<Order> {
    let mut order = Order::from_ticket(ticket)?;
    order.current_state = OrderState::New;
    order.fill_qty = 0;

    let recall_qty = oms_entries
        .first()
        .map(TransactionLogEntry::recall_qty)
        .unwrap_or(ticket.recall_qty);
    order.ord_qty = recall_qty;
    if let Some(fill) = order.fill_request.as_mut() {
        fill.leaves_qty = recall_qty;
    }
    if let Some(amend) = order.amend_request.as_mut() {
        amend.order_qty = recall_qty;
    }

    for entry in oms_entries {
        match entry.payload() {
            Some(LogPayload::Order(source_order)) => {
                apply_order_entry(&mut order, entry, source_order, cfg);
            }
            Some(LogPayload::ExecReport(report)) => {
                apply_exec_entry(&mut order, entry, report, cfg);
            }
            Some(other) => {
                warn!(
                    order_id = entry.order_id(),
                    source = entry.source(),
                    kind = other.kind(),
                    "unexpected payload kind in oms stream, skipped"
                );
            }
            None => {
                warn!(
                    order_id = entry.order_id(),
                    source = entry.source(),
                    "oms entry without payload, skipped"
                );
            }
        }
    }

    // Restate leaves so the fill request always balances against the order
    // quantity, whichever report patched it last.
    if let Some(fill) = order.fill_request.as_mut() {
        fill.leaves_qty = order.ord_qty.saturating_sub(fill.cum_qty);
    }
    Some(order)
}

fn apply_order_entry(
    order: &mut Order,
    entry: &TransactionLogEntry,
    source_order: &Order,
    cfg: &RecoveryConfig,
) {
    let Some(state) = OrderState::parse(entry.state()) else {
        warn!(
            order_id = entry.order_id(),
            state = entry.state(),
            "order entry state outside vocabulary, skipped"
        );
        return;
    };

    // PendingFill and DoneOfDay on the outbound stream are carried by
    // execution reports, not order snapshots.
    let suppressed = entry.source() == cfg.recall_to_oms_topic
        && matches!(state, OrderState::PendingFill | OrderState::DoneOfDay);
    if !suppressed {
        order.current_state = state;
    }

    if matches!(state, OrderState::PendingReplace | OrderState::PendingCancel) {
        order.amend_request = Some(match &source_order.amend_request {
            Some(amend) => amend.clone(),
            None => AmendRequest {
                order_qty: entry.recall_qty(),
                price: entry.fill_price(),
                cl_ord_id: Uuid::new_v4().to_string(),
                orig_cl_ord_id: entry.order_id().to_string(),
            },
        });
    }
}

fn apply_exec_entry(
    order: &mut Order,
    entry: &TransactionLogEntry,
    report: &ExecutionReport,
    cfg: &RecoveryConfig,
) {
    let Some(state) = OrderState::parse(entry.state()) else {
        warn!(
            order_id = entry.order_id(),
            state = entry.state(),
            "exec entry state outside vocabulary, skipped"
        );
        return;
    };

    let from_oms = entry.source() == cfg.oms_to_recall_topic;
    let from_recall = entry.source() == cfg.recall_to_oms_topic;

    if from_oms {
        order.current_state = state;
    } else if from_recall && matches!(state, OrderState::PendingFill | OrderState::DoneOfDay) {
        order.current_state = state;
    }

    let fill_event = (from_recall && state == OrderState::PendingFill)
        || (from_oms
            && matches!(state, OrderState::Filled | OrderState::PartiallyFilled));
    if fill_event {
        patch_fill_request(order, report);
    }
}

/// The monotonic-fill rule: the first report seeds the fill request (with
/// identity fields defaulted from the order when blank); later reports
/// refine quantities and prices but never regress a non-zero value.
fn patch_fill_request(order: &mut Order, report: &ExecutionReport) {
    match order.fill_request.take() {
        None => {
            let mut fill = report.clone();
            if fill.cl_ord_id.is_empty() {
                fill.cl_ord_id = order.order_id.clone();
            }
            if fill.orig_cl_ord_id.is_empty() {
                fill.orig_cl_ord_id = order.order_id.clone();
            }
            if fill.order_id.is_empty() {
                fill.order_id = order.order_id.clone();
            }
            if fill.currency.is_empty() {
                fill.currency = order.currency.clone();
            }
            if fill.side.is_empty() {
                fill.side = order.side.clone();
            }
            if fill.symbol.is_empty() {
                fill.symbol = order.symbol.clone();
            }
            order.fill_request = Some(fill);
        }
        Some(mut fill) => {
            if report.last_qty > 0 {
                fill.last_qty = report.last_qty;
            }
            if report.cum_qty > 0 {
                fill.cum_qty = report.cum_qty;
            }
            // Zero leaves is meaningful: it marks a completed fill.
            fill.leaves_qty = report.leaves_qty;
            if report.last_price > 0.0 {
                fill.last_price = report.last_price;
            }
            if report.avg_price > 0.0 {
                fill.avg_price = report.avg_price;
            }
            if !report.exec_id.is_empty() {
                fill.exec_id = report.exec_id.clone();
            }
            if report.exec_type.is_some() {
                fill.exec_type = report.exec_type;
            }
            if !report.order_state.is_empty() {
                fill.order_state = report.order_state.clone();
            }
            if !report.transact_time.is_empty() {
                fill.transact_time = report.transact_time.clone();
            }
            if !report.sending_time.is_empty() {
                fill.sending_time = report.sending_time.clone();
            }
            order.fill_request = Some(fill);
        }
    }
}

use crate::model::LogPayload;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("log entry missing required field {0}")]
    MissingField(&'static str),
}

/// One record of the replayed transaction log. Immutable once built;
/// construction goes through [`LogEntryBuilder`], which enforces the
/// required identity fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLogEntry {
    order_id: String,
    source: String,
    state: String,
    timestamp: OffsetDateTime,
    payload: Option<LogPayload>,
    recall_qty: u64,
    fill_qty: u64,
    fill_price: f64,
    execution_id: Option<String>,
    exec_type: Option<char>,
}

impl TransactionLogEntry {
    pub fn builder() -> LogEntryBuilder {
        LogEntryBuilder::default()
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn payload(&self) -> Option<&LogPayload> {
        self.payload.as_ref()
    }

    pub fn recall_qty(&self) -> u64 {
        self.recall_qty
    }

    pub fn fill_qty(&self) -> u64 {
        self.fill_qty
    }

    pub fn fill_price(&self) -> f64 {
        self.fill_price
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn exec_type(&self) -> Option<char> {
        self.exec_type
    }
}

#[derive(Debug, Default)]
pub struct LogEntryBuilder {
    order_id: Option<String>,
    source: Option<String>,
    state: Option<String>,
    timestamp: Option<OffsetDateTime>,
    payload: Option<LogPayload>,
    recall_qty: u64,
    fill_qty: u64,
    fill_price: f64,
    execution_id: Option<String>,
    exec_type: Option<char>,
}

impl LogEntryBuilder {
    pub fn order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload(mut self, payload: LogPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn recall_qty(mut self, recall_qty: u64) -> Self {
        self.recall_qty = recall_qty;
        self
    }

    pub fn fill_qty(mut self, fill_qty: u64) -> Self {
        self.fill_qty = fill_qty;
        self
    }

    pub fn fill_price(mut self, fill_price: f64) -> Self {
        self.fill_price = fill_price;
        self
    }

    pub fn execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn exec_type(mut self, exec_type: char) -> Self {
        self.exec_type = Some(exec_type);
        self
    }

    pub fn build(self) -> Result<TransactionLogEntry, JournalError> {
        Ok(TransactionLogEntry {
            order_id: self.order_id.ok_or(JournalError::MissingField("order_id"))?,
            source: self.source.ok_or(JournalError::MissingField("source"))?,
            state: self.state.ok_or(JournalError::MissingField("state"))?,
            timestamp: self
                .timestamp
                .ok_or(JournalError::MissingField("timestamp"))?,
            payload: self.payload,
            recall_qty: self.recall_qty,
            fill_qty: self.fill_qty,
            fill_price: self.fill_price,
            execution_id: self.execution_id,
            exec_type: self.exec_type,
        })
    }
}

/// Builds a log entry from a decoded payload at the subscription boundary,
/// lifting the state, quantity triple, and execution identity from whichever
/// variant arrived.
pub fn entry_from_payload(
    source: &str,
    payload: LogPayload,
    timestamp: OffsetDateTime,
) -> Result<TransactionLogEntry, JournalError> {
    let builder = TransactionLogEntry::builder()
        .source(source)
        .timestamp(timestamp);
    let builder = match &payload {
        LogPayload::Ticket(ticket) => builder
            .order_id(&ticket.id)
            .state(&ticket.current_state)
            .recall_qty(ticket.recall_qty)
            .fill_qty(ticket.fill_qty)
            .fill_price(ticket.fill_price),
        LogPayload::Order(order) => {
            let builder = builder
                .order_id(&order.order_id)
                .state(order.current_state.as_str())
                .recall_qty(order.ord_qty)
                .fill_qty(order.fill_qty);
            match &order.amend_request {
                Some(amend) => builder.fill_price(amend.price),
                None => builder,
            }
        }
        LogPayload::ExecReport(report) => {
            let builder = builder
                .order_id(&report.order_id)
                .state(&report.order_state)
                .recall_qty(report.cum_qty + report.leaves_qty)
                .fill_qty(report.cum_qty)
                .fill_price(report.avg_price)
                .execution_id(&report.exec_id);
            match report.exec_type {
                Some(exec_type) => builder.exec_type(exec_type),
                None => builder,
            }
        }
    };
    builder.payload(payload).build()
}

#[derive(Debug, Default)]
struct JournalState {
    entries: HashMap<String, Vec<TransactionLogEntry>>,
    caught_up: HashSet<String>,
}

/// Per-order aggregation of replayed log entries. Subscribers append in
/// arrival order while the replay window is open and mark their stream
/// caught-up once it reaches bookmark parity; the driver waits on the gate
/// for at most the configured timeout and then proceeds with whatever has
/// been aggregated.
#[derive(Debug, Default)]
pub struct TransactionJournal {
    state: Mutex<JournalState>,
    parity: Condvar,
}

impl TransactionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: TransactionLogEntry) {
        let mut state = lock(&self.state);
        state
            .entries
            .entry(entry.order_id().to_string())
            .or_default()
            .push(entry);
    }

    pub fn mark_caught_up(&self, source: &str) {
        let mut state = lock(&self.state);
        state.caught_up.insert(source.to_string());
        self.parity.notify_all();
    }

    /// Blocks until every listed source is caught up, or the timeout
    /// elapses. Returns whether parity was reached.
    pub fn await_parity(&self, sources: &[&str], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if sources
                .iter()
                .all(|source| state.caught_up.contains(*source))
            {
                return true;
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return false,
            };
            let (guard, wait) = match self.parity.wait_timeout(state, remaining) {
                Ok(woken) => woken,
                Err(poisoned) => {
                    let (guard, wait) = poisoned.into_inner();
                    (guard, wait)
                }
            };
            state = guard;
            if wait.timed_out() {
                return sources
                    .iter()
                    .all(|source| state.caught_up.contains(*source));
            }
        }
    }

    pub fn order_count(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn entry_count(&self) -> usize {
        lock(&self.state).entries.values().map(Vec::len).sum()
    }

    /// Takes the aggregated entries, leaving the journal empty.
    pub fn drain(&self) -> HashMap<String, Vec<TransactionLogEntry>> {
        std::mem::take(&mut lock(&self.state).entries)
    }
}

fn lock(state: &Mutex<JournalState>) -> std::sync::MutexGuard<'_, JournalState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogPayload, RecallTicket};
    use std::sync::Arc;
    use time::macros::datetime;

    fn entry(order_id: &str, source: &str) -> TransactionLogEntry {
        TransactionLogEntry::builder()
            .order_id(order_id)
            .source(source)
            .state("Created")
            .timestamp(datetime!(2025-03-21 14:00 UTC))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_rejects_missing_required_fields() {
        let err = TransactionLogEntry::builder()
            .source("RECALL/TICKET/HISTORY")
            .state("Created")
            .timestamp(datetime!(2025-03-21 14:00 UTC))
            .build()
            .unwrap_err();
        assert!(matches!(err, JournalError::MissingField("order_id")));

        let err = TransactionLogEntry::builder()
            .order_id("R-1")
            .source("RECALL/TICKET/HISTORY")
            .state("Created")
            .build()
            .unwrap_err();
        assert!(matches!(err, JournalError::MissingField("timestamp")));
    }

    #[test]
    fn entries_aggregate_by_order_in_arrival_order() {
        let journal = TransactionJournal::new();
        journal.append(entry("R-1", "RECALL/TO/OMS"));
        journal.append(entry("R-2", "OMS/TO/RECALL"));
        journal.append(entry("R-1", "OMS/TO/RECALL"));

        assert_eq!(journal.order_count(), 2);
        assert_eq!(journal.entry_count(), 3);

        let drained = journal.drain();
        assert_eq!(drained["R-1"].len(), 2);
        assert_eq!(drained["R-1"][0].source(), "RECALL/TO/OMS");
        assert_eq!(drained["R-1"][1].source(), "OMS/TO/RECALL");
        assert_eq!(journal.entry_count(), 0);
    }

    #[test]
    fn entry_from_ticket_payload_lifts_state_and_quantities() {
        let ticket = RecallTicket {
            id: "R-1".to_string(),
            current_state: "PendingFill".to_string(),
            recall_qty: 100,
            fill_qty: 40,
            fill_price: 9.75,
            ..RecallTicket::default()
        };
        let entry = entry_from_payload(
            "RECALL/TICKET/HISTORY",
            LogPayload::Ticket(ticket),
            datetime!(2025-03-21 14:00 UTC),
        )
        .unwrap();
        assert_eq!(entry.order_id(), "R-1");
        assert_eq!(entry.state(), "PendingFill");
        assert_eq!(entry.recall_qty(), 100);
        assert_eq!(entry.fill_qty(), 40);
        assert!((entry.fill_price() - 9.75).abs() < f64::EPSILON);
        assert!(entry.payload().and_then(LogPayload::ticket).is_some());
    }

    #[test]
    fn entry_from_exec_payload_carries_execution_identity() {
        let report = crate::model::ExecutionReport {
            exec_id: "E-5".to_string(),
            exec_type: Some('F'),
            order_id: "R-2".to_string(),
            cum_qty: 60,
            leaves_qty: 40,
            avg_price: 10.0,
            order_state: "PartiallyFilled".to_string(),
            ..crate::model::ExecutionReport::default()
        };
        let entry = entry_from_payload(
            "OMS/TO/RECALL",
            LogPayload::ExecReport(report),
            datetime!(2025-03-21 14:01 UTC),
        )
        .unwrap();
        assert_eq!(entry.execution_id(), Some("E-5"));
        assert_eq!(entry.exec_type(), Some('F'));
        assert_eq!(entry.recall_qty(), 100);
        assert_eq!(entry.fill_qty(), 60);
    }

    #[test]
    fn parity_gate_times_out_without_catch_up() {
        let journal = TransactionJournal::new();
        let reached = journal.await_parity(
            &["RECALL/TICKET/HISTORY"],
            Duration::from_millis(20),
        );
        assert!(!reached);
    }

    #[test]
    fn parity_gate_opens_when_all_sources_catch_up() {
        let journal = Arc::new(TransactionJournal::new());
        let background = Arc::clone(&journal);
        let handle = std::thread::spawn(move || {
            background.mark_caught_up("RECALL/TO/OMS");
            background.mark_caught_up("OMS/TO/RECALL");
        });
        let reached = journal.await_parity(
            &["RECALL/TO/OMS", "OMS/TO/RECALL"],
            Duration::from_secs(2),
        );
        handle.join().unwrap();
        assert!(reached);
    }
}

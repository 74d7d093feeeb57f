use crate::bookmark::parse_bookmark;
use crate::cache::StateCache;
use crate::journal::{TransactionJournal, TransactionLogEntry};
use crate::model::LogPayload;
use crate::publisher::{dfd_request, ticket_payload, OutboundClient};
use crate::rebuild::rebuild_order;
use crate::reconcile::{reconcile, RecoveryAction, RecoveryContext};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecoveryConfig {
    /// Upper bound on the replay wait per stream, in milliseconds.
    pub timeout_ms: u64,
    pub ticket_history_topic: String,
    pub recall_to_oms_topic: String,
    pub oms_to_recall_topic: String,
    /// Publish target for REPUBLISH actions.
    pub recall_ticket_topic: String,
    /// Publish target for compensating done-for-day requests.
    pub dfd_request_topic: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            ticket_history_topic: "RECALL/TICKET/HISTORY".to_string(),
            recall_to_oms_topic: "RECALL/TO/OMS".to_string(),
            oms_to_recall_topic: "OMS/TO/RECALL".to_string(),
            recall_ticket_topic: "RECALL/TICKET".to_string(),
            dfd_request_topic: "RECALL/DFD/REQUEST".to_string(),
        }
    }
}

/// Replay positions for the two bookmark families: ticket history and the
/// two OMS streams. `None` means unfiltered replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bookmarks {
    pub ticket: Option<OffsetDateTime>,
    pub oms: Option<OffsetDateTime>,
}

impl Bookmarks {
    pub fn from_raw(ticket: &str, oms: &str) -> Self {
        Self {
            ticket: parse_bookmark(ticket),
            oms: parse_bookmark(oms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryCounters {
    pub processed: u64,
    pub rebuilt: u64,
    pub republished: u64,
    pub ignored: u64,
    pub errored: u64,
    pub discarded_history: u64,
    pub discarded_oms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Orchestrates the recovery pass: waits for replay parity, then walks each
/// aggregated order through filter, sort, rebuild, compare, and execute.
/// Per-order failures are counted and logged; nothing aborts the pass.
pub struct RecoveryDriver<C: OutboundClient> {
    cfg: RecoveryConfig,
    cache: Arc<StateCache>,
    outbound: Option<C>,
    counters: RecoveryCounters,
}

impl<C: OutboundClient> RecoveryDriver<C> {
    pub fn new(cfg: RecoveryConfig, cache: Arc<StateCache>, outbound: Option<C>) -> Self {
        Self {
            cfg,
            cache,
            outbound,
            counters: RecoveryCounters::default(),
        }
    }

    pub fn counters(&self) -> &RecoveryCounters {
        &self.counters
    }

    pub fn run(&mut self, journal: &TransactionJournal, bookmarks: Bookmarks) {
        let sources = [
            self.cfg.ticket_history_topic.clone(),
            self.cfg.recall_to_oms_topic.clone(),
            self.cfg.oms_to_recall_topic.clone(),
        ];
        let source_refs: Vec<&str> = sources.iter().map(String::as_str).collect();
        let timeout = Duration::from_millis(self.cfg.timeout_ms);
        if !journal.await_parity(&source_refs, timeout) {
            warn!(
                timeout_ms = self.cfg.timeout_ms,
                "replay window closed before bookmark parity, proceeding with aggregated entries"
            );
        }

        let mut aggregated = journal.drain();
        let mut order_ids: Vec<String> = aggregated.keys().cloned().collect();
        order_ids.sort();

        for order_id in order_ids {
            let Some(entries) = aggregated.remove(&order_id) else {
                continue;
            };
            self.counters.processed += 1;
            match self.process_order(&order_id, entries, bookmarks) {
                Ok(RecoveryAction::Rebuild) => self.counters.rebuilt += 1,
                Ok(RecoveryAction::Republish) => self.counters.republished += 1,
                Ok(RecoveryAction::Ignore) => self.counters.ignored += 1,
                Err(err) => {
                    self.counters.errored += 1;
                    error!(order_id = %order_id, %err, "order recovery failed, continuing");
                }
            }
        }

        let counters = self.counters;
        info!(
            processed = counters.processed,
            rebuilt = counters.rebuilt,
            republished = counters.republished,
            ignored = counters.ignored,
            errored = counters.errored,
            discarded_history = counters.discarded_history,
            discarded_oms = counters.discarded_oms,
            cached_tickets = self.cache.ticket_count(),
            cached_orders = self.cache.order_count(),
            "recovery pass complete"
        );
    }

    fn process_order(
        &mut self,
        order_id: &str,
        entries: Vec<TransactionLogEntry>,
        bookmarks: Bookmarks,
    ) -> Result<RecoveryAction, RecoveryError> {
        let mut history = Vec::new();
        let mut oms = Vec::new();
        for entry in entries {
            if entry.source() == self.cfg.ticket_history_topic {
                if within_bookmark(&entry, bookmarks.ticket) {
                    history.push(entry);
                } else {
                    self.counters.discarded_history += 1;
                }
            } else if entry.source() == self.cfg.recall_to_oms_topic
                || entry.source() == self.cfg.oms_to_recall_topic
            {
                if within_bookmark(&entry, bookmarks.oms) {
                    oms.push(entry);
                } else {
                    self.counters.discarded_oms += 1;
                }
            } else {
                warn!(
                    order_id,
                    source = entry.source(),
                    "entry from unrecognised source, skipped"
                );
            }
        }
        history.sort_by_key(TransactionLogEntry::timestamp);
        oms.sort_by_key(TransactionLogEntry::timestamp);

        if history.is_empty() {
            debug!(order_id, "no valid ticket history after filtering, skipped");
            return Ok(RecoveryAction::Ignore);
        }

        let latest_history = history.last().cloned();
        let ticket = latest_history
            .as_ref()
            .and_then(TransactionLogEntry::payload)
            .and_then(LogPayload::ticket)
            .cloned();
        let latest_recall_to_oms = oms
            .iter()
            .rev()
            .find(|entry| entry.source() == self.cfg.recall_to_oms_topic)
            .cloned();
        let latest_oms_to_recall = oms
            .iter()
            .rev()
            .find(|entry| entry.source() == self.cfg.oms_to_recall_topic)
            .cloned();
        let rebuilt_order = ticket
            .as_ref()
            .and_then(|ticket| rebuild_order(ticket, &oms, &self.cfg));

        let mut ctx = RecoveryContext {
            order_id: order_id.to_string(),
            ticket,
            ticket_history_entries: history,
            oms_entries: oms,
            latest_history_entry: latest_history,
            latest_recall_to_oms,
            latest_oms_to_recall,
            rebuilt_order,
            ..RecoveryContext::default()
        };
        debug!(
            order_id,
            ticket_state = ctx.ticket.as_ref().map(|t| t.current_state.as_str()),
            outbound_state = ctx.latest_recall_to_oms.as_ref().map(|e| e.state()),
            inbound_state = ctx.latest_oms_to_recall.as_ref().map(|e| e.state()),
            "recovery context assembled"
        );

        let action = reconcile(&mut ctx);
        self.execute(&ctx, action)?;
        debug!(order_id, action = action.as_str(), "recovery action executed");
        Ok(action)
    }

    fn execute(&mut self, ctx: &RecoveryContext, action: RecoveryAction) -> Result<(), RecoveryError> {
        let (Some(ticket), Some(order)) = (&ctx.ticket, &ctx.rebuilt_order) else {
            return Ok(());
        };
        match action {
            RecoveryAction::Ignore => {}
            RecoveryAction::Rebuild => {
                self.cache.update_recall_ticket(&ticket.id, ticket.clone());
                self.cache.update_order(&ctx.order_id, order.clone());
                if ctx.force_ticket_state_update {
                    error!(
                        order_id = %ctx.order_id,
                        previous_state = ctx.previous_ticket_state.as_deref(),
                        rebuilt_state = order.current_state.as_str(),
                        "ticket state overwritten to match rebuilt order"
                    );
                }
                if ctx.needs_dfd_request {
                    let payload = dfd_request(order);
                    let topic = self.cfg.dfd_request_topic.clone();
                    self.publish(&topic, &ctx.order_id, &payload, "dfd request");
                }
            }
            RecoveryAction::Republish => {
                self.cache.update_recall_ticket(&ticket.id, ticket.clone());
                self.cache.update_order(&ctx.order_id, order.clone());
                let payload = ticket_payload(ticket)?;
                let topic = self.cfg.recall_ticket_topic.clone();
                self.publish(&topic, &ticket.id, &payload, "ticket republish");
            }
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, key: &str, payload: &str, what: &str) {
        match self.outbound.as_mut() {
            None => {
                warn!(topic, what, "outbound client not configured, publish skipped");
            }
            Some(client) => {
                if let Err(err) = client.publish(topic, key, payload) {
                    self.counters.errored += 1;
                    error!(topic, what, error = %err, "publish failed, not retried");
                }
            }
        }
    }
}

fn within_bookmark(entry: &TransactionLogEntry, bookmark: Option<OffsetDateTime>) -> bool {
    match bookmark {
        Some(bookmark) => entry.timestamp() <= bookmark,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn bookmarks_parse_both_families_independently() {
        let bookmarks =
            Bookmarks::from_raw("20250321T135900.0000000Z", "not-a-timestamp");
        assert_eq!(
            bookmarks.ticket,
            Some(datetime!(2025-03-21 13:59 UTC))
        );
        assert!(bookmarks.oms.is_none());
    }

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(RecoveryCounters::default(), RecoveryCounters {
            processed: 0,
            rebuilt: 0,
            republished: 0,
            ignored: 0,
            errored: 0,
            discarded_history: 0,
            discarded_oms: 0,
        });
    }
}

use crate::model::{Order, RecallTicket};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;

/// Process-wide cache of recall tickets and their derived orders. Writes
/// during recovery come from a single driver; after initialization the
/// per-map locks govern concurrent mutation from live traffic.
#[derive(Debug, Default)]
pub struct StateCache {
    tickets: RwLock<HashMap<String, RecallTicket>>,
    orders: RwLock<HashMap<String, Order>>,
    init_gate: Mutex<bool>,
    initialized: AtomicBool,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True only after a one-shot [`StateCache::initialize`] ran to
    /// completion.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Runs `recover` exactly once. Concurrent callers serialise on the
    /// gate and observe a single execution; later calls are no-ops. The
    /// initialized flag is only set once `recover` returns, so a panic
    /// inside it leaves the cache uninitialised.
    pub fn initialize<F: FnOnce()>(&self, recover: F) -> bool {
        let mut gate = self
            .init_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *gate {
            return false;
        }
        recover();
        *gate = true;
        self.initialized.store(true, Ordering::Release);
        true
    }

    pub fn update_recall_ticket(&self, id: &str, ticket: RecallTicket) {
        let mut tickets = self
            .tickets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tickets.insert(id.to_string(), ticket);
    }

    pub fn update_order(&self, order_id: &str, order: Order) {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        orders.insert(order_id.to_string(), order);
    }

    pub fn recall_ticket(&self, id: &str) -> Option<RecallTicket> {
        self.tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(order_id)
            .cloned()
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn order_count(&self) -> usize {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Boundary hook invoked by the host once the container context is
/// refreshed. Runs the recovery pass through the cache's one-shot gate so
/// readers are released only against fully rebuilt state.
pub struct ContextReadySignal<F: FnOnce()> {
    cache: Arc<StateCache>,
    recovery: Mutex<Option<F>>,
}

impl<F: FnOnce()> ContextReadySignal<F> {
    pub fn new(cache: Arc<StateCache>, recovery: F) -> Self {
        Self {
            cache,
            recovery: Mutex::new(Some(recovery)),
        }
    }

    pub fn context_refreshed(&self) {
        if self.cache.is_initialized() {
            info!("context refreshed: state cache already initialized, nothing to do");
            return;
        }
        let recovery = self
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match recovery {
            Some(recovery) => {
                info!("context refreshed: starting recovery initialization");
                self.cache.initialize(recovery);
            }
            None => {
                info!("context refreshed: recovery already in flight, nothing to do");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn initialize_runs_once_across_threads() {
        let cache = Arc::new(StateCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(std::thread::spawn(move || {
                cache.initialize(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(cache.is_initialized());
    }

    #[test]
    fn reads_reflect_recovery_writes() {
        let cache = StateCache::new();
        assert!(!cache.is_initialized());

        cache.initialize(|| {
            cache.update_recall_ticket(
                "R-1",
                RecallTicket {
                    id: "R-1".to_string(),
                    current_state: "Created".to_string(),
                    ..RecallTicket::default()
                },
            );
            cache.update_order(
                "R-1",
                Order {
                    order_id: "R-1".to_string(),
                    ..Order::default()
                },
            );
        });

        assert!(cache.is_initialized());
        assert_eq!(cache.ticket_count(), 1);
        assert_eq!(cache.order_count(), 1);
        assert_eq!(cache.recall_ticket("R-1").unwrap().current_state, "Created");
        assert!(cache.order("R-2").is_none());
    }

    #[test]
    fn context_refresh_initializes_exactly_once() {
        let cache = Arc::new(StateCache::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let signal = ContextReadySignal::new(Arc::clone(&cache), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.context_refreshed();
        signal.context_refreshed();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(cache.is_initialized());
    }
}

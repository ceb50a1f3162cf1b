use std::sync::Arc;

use parking_lot::RwLock;
use skygrid_api::{EventResult, WorkflowEvent, WorkflowListener};
use tracing::{debug, info};

/// Listeners that may veto a workflow before it starts.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn WorkflowListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn WorkflowListener>) {
        info!("Registered workflow listener '{}'", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch in registration order. The first cancellation wins and
    /// later listeners are not called.
    pub fn dispatch(&self, event: &WorkflowEvent) -> EventResult {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let EventResult::Cancelled(reason) = listener.on_event(event) {
                debug!(
                    "Listener '{}' cancelled {:?} for {}",
                    listener.name(),
                    event,
                    event.player().name
                );
                return EventResult::Cancelled(reason);
            }
        }
        EventResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skygrid_api::{ActorSnapshot, PlayerId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
        veto: Option<&'static str>,
    }

    impl WorkflowListener for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_event(&self, _event: &WorkflowEvent) -> EventResult {
            self.seen.fetch_add(1, Ordering::SeqCst);
            match self.veto {
                Some(reason) => EventResult::Cancelled(Some(reason.to_string())),
                None => EventResult::Continue,
            }
        }
    }

    fn switch_event() -> WorkflowEvent {
        WorkflowEvent::SlotSwitch {
            player: ActorSnapshot::new(PlayerId::random(), "Alex"),
            from_slot: 1,
            to_slot: 2,
        }
    }

    #[test]
    fn first_veto_stops_dispatch() {
        let registry = ListenerRegistry::new();
        let first = Arc::new(Counting { seen: AtomicUsize::new(0), veto: None });
        let blocker = Arc::new(Counting { seen: AtomicUsize::new(0), veto: Some("Event in progress") });
        let last = Arc::new(Counting { seen: AtomicUsize::new(0), veto: None });
        registry.register(first.clone());
        registry.register(blocker.clone());
        registry.register(last.clone());

        let result = registry.dispatch(&switch_event());

        assert_eq!(result, EventResult::Cancelled(Some("Event in progress".into())));
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(blocker.seen.load(Ordering::SeqCst), 1);
        assert_eq!(last.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_registry_continues() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&switch_event()), EventResult::Continue);
    }
}

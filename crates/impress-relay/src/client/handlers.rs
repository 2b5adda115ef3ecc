//! Callbacks for inbound events and connection state changes

use std::collections::HashMap;

use impress_collab::{EventKind, RelayedEvent};

use super::ConnectionState;

type EventCallback = Box<dyn Fn(&RelayedEvent) + Send + Sync>;
type StateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Registered callbacks, keyed by event kind.
#[derive(Default)]
pub struct EventHandlers {
    by_kind: HashMap<EventKind, Vec<EventCallback>>,
    any: Vec<EventCallback>,
    state: Vec<StateCallback>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every relayed event of `kind`
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&RelayedEvent) + Send + Sync + 'static,
    {
        self.by_kind.entry(kind).or_default().push(Box::new(handler));
    }

    /// Call `handler` for every relayed event
    pub fn on_any<F>(&mut self, handler: F)
    where
        F: Fn(&RelayedEvent) + Send + Sync + 'static,
    {
        self.any.push(Box::new(handler));
    }

    pub fn on_state_change<F>(&mut self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.state.push(Box::new(handler));
    }

    /// Run kind-specific handlers, then catch-all handlers
    pub fn dispatch(&self, relayed: &RelayedEvent) {
        if let Some(handlers) = self.by_kind.get(&relayed.event.kind()) {
            for handler in handlers {
                handler(relayed);
            }
        }
        for handler in &self.any {
            handler(relayed);
        }
    }

    pub fn notify_state(&self, state: ConnectionState) {
        for handler in &self.state {
            handler(state);
        }
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("kinds", &self.by_kind.keys().collect::<Vec<_>>())
            .field("any", &self.any.len())
            .field("state", &self.state.len())
            .finish()
    }
}

//! Handler bookkeeping shared by provider implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{ListenerId, NotificationHandler, ProviderEventKind, ProviderNotification};

/// Registered notification handlers, keyed by event kind.
///
/// Dispatch clones the matching handlers out of the lock before calling them,
/// so a handler may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: Mutex<HashMap<ProviderEventKind, Vec<(ListenerId, NotificationHandler)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: ProviderEventKind, handler: NotificationHandler) -> ListenerId {
        let id = ListenerId::new();
        self.handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push((id.clone(), handler));
        id
    }

    pub fn remove(&self, kind: ProviderEventKind, id: &ListenerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| existing != id);
        before != list.len()
    }

    /// Number of handlers registered for `kind`.
    pub fn count(&self, kind: ProviderEventKind) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Call every handler for the notification's kind, in registration order.
    ///
    /// Returns how many handlers were invoked.
    pub fn dispatch(&self, notification: &ProviderNotification) -> usize {
        let targets: Vec<NotificationHandler> = {
            let handlers = self.handlers.lock().unwrap();
            handlers
                .get(&notification.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &targets {
            handler(notification);
        }
        targets.len()
    }
}

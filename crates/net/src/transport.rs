//! Transport boundary
//!
//! A transport knows where to connect and how to connect. It reports the
//! outcome through [`TransportEvents`]; listeners stay registered for as long
//! as the [`ListenerHandle`] returned at registration is alive.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Why a transport lost (or never got) its connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    #[error("connection closed")]
    Closed,

    #[error("rejected by host: {0}")]
    Rejected(String),

    #[error("{0}")]
    Error(String),

    #[error("connect timed out")]
    TimedOut,
}

/// Capabilities the connection coordinator needs from a network client
pub trait Transport: Send + Sync {
    fn set_target_address(&self, address: &str);

    fn set_target_port(&self, port: u16);

    /// Port currently configured for the next connect
    fn target_port(&self) -> u16;

    /// Start connecting to the configured target. The outcome is reported
    /// asynchronously through [`Transport::events`].
    fn connect(&self);

    /// Drop the current connection or abandon a pending one
    fn disconnect(&self) {}

    fn events(&self) -> &TransportEvents;
}

type ConnectedFn = Arc<dyn Fn() + Send + Sync>;
type DisconnectedFn = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    connected: Vec<(u64, ConnectedFn)>,
    disconnected: Vec<(u64, DisconnectedFn)>,
}

impl Listeners {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Registry of connect/disconnect listeners owned by a transport
#[derive(Clone, Default)]
pub struct TransportEvents {
    listeners: Arc<Mutex<Listeners>>,
}

impl TransportEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.allocate_id();
        listeners.connected.push((id, Arc::new(listener)));
        self.handle(id)
    }

    pub fn on_disconnected<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.allocate_id();
        listeners.disconnected.push((id, Arc::new(listener)));
        self.handle(id)
    }

    /// Notify every connected listener
    pub fn emit_connected(&self) {
        // Snapshot so listeners may register or drop handles while running
        let snapshot: Vec<ConnectedFn> = lock(&self.listeners)
            .connected
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for listener in snapshot {
            listener();
        }
    }

    /// Notify every disconnected listener
    pub fn emit_disconnected(&self, reason: DisconnectReason) {
        let snapshot: Vec<DisconnectedFn> = lock(&self.listeners)
            .disconnected
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for listener in snapshot {
            listener(&reason);
        }
    }

    /// Number of live registrations
    pub fn listener_count(&self) -> usize {
        let listeners = lock(&self.listeners);
        listeners.connected.len() + listeners.disconnected.len()
    }

    fn handle(&self, id: u64) -> ListenerHandle {
        ListenerHandle {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Scoped listener registration; dropping it unregisters the listener
#[must_use = "the listener is removed as soon as the handle is dropped"]
pub struct ListenerHandle {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = lock(&listeners);
            listeners.connected.retain(|(id, _)| *id != self.id);
            listeners.disconnected.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

/// Lock ignoring poisoning; the guarded data stays consistent between calls
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_listeners() {
        let events = TransportEvents::new();
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(Mutex::new(Vec::new()));

        let c = connected.clone();
        let _on_connected = events.on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let d = disconnected.clone();
        let _on_disconnected = events.on_disconnected(move |reason| {
            d.lock().unwrap().push(reason.clone());
        });

        events.emit_connected();
        events.emit_disconnected(DisconnectReason::Rejected("full".into()));

        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(
            *disconnected.lock().unwrap(),
            vec![DisconnectReason::Rejected("full".into())]
        );
    }

    #[test]
    fn test_dropping_handle_unregisters() {
        let events = TransportEvents::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let handle = events.on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(events.listener_count(), 1);

        drop(handle);
        assert_eq!(events.listener_count(), 0);

        events.emit_connected();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handle_outlives_registry() {
        let events = TransportEvents::new();
        let handle = events.on_disconnected(|_| {});
        drop(events);
        drop(handle);
    }

    #[test]
    fn test_listener_can_register_during_emit() {
        let events = TransportEvents::new();
        let late = Arc::new(Mutex::new(Vec::new()));

        let inner_events = events.clone();
        let l = late.clone();
        let _handle = events.on_connected(move || {
            l.lock().unwrap().push(inner_events.on_connected(|| {}));
        });

        events.emit_connected();
        assert_eq!(events.listener_count(), 2);
    }
}

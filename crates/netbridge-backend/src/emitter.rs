//! Synchronous fan-out of [`NetworkEvent`]s from a handler to its observers.
//!
//! Handlers call [`EventEmitter::emit`] after they have finished mutating
//! their own state and released their locks. Listeners run inline, on the
//! emitting task, before `emit` returns, so anything a listener records is
//! visible by the time the handler operation that raised the event returns.
//!
//! A listener stays registered for as long as the [`Subscription`] returned
//! by [`EventEmitter::subscribe`] is alive.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use netbridge_protocol::{NetworkEvent, Operation, OperationOutcome};

use crate::BackendError;

/// Effect events and success message of a finished lobby/room operation.
pub type Completion = Result<(Vec<NetworkEvent>, String), BackendError>;

type Listener = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // A listener that panicked mid-emit doesn't leave the list inconsistent.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observer list owned by a handler.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Arc<Mutex<Registry>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. It is removed when the returned guard drops.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to every current listener, in subscription order.
    ///
    /// The listener list is snapshotted first, so a listener may subscribe
    /// or unsubscribe without deadlocking.
    pub fn emit(&self, event: NetworkEvent) {
        let snapshot: Vec<Listener> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        tracing::trace!(kind = event.kind(), listeners = snapshot.len(), "emit");
        for listener in snapshot {
            listener(&event);
        }
    }

    /// Emits a batch in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = NetworkEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Reports the end of a lobby/room operation.
    ///
    /// On success the effect events go out first, then exactly one
    /// completion for `operation`. On failure only the failed completion
    /// goes out, carrying the error's text.
    pub fn complete(&self, operation: Operation, result: Completion) -> Result<(), BackendError> {
        match result {
            Ok((mut events, message)) => {
                tracing::debug!(%operation, %message, "operation completed");
                events.push(NetworkEvent::completed(OperationOutcome::succeeded(
                    operation, message,
                )));
                self.emit_all(events);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%operation, error = %err, "operation failed");
                self.emit(NetworkEvent::completed(OperationOutcome::failed(
                    operation,
                    err.to_string(),
                )));
                Err(err)
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Unsubscribes now. Same as dropping the guard.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter(emitter: &EventEmitter) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = emitter.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_emit_reaches_every_listener() {
        let emitter = EventEmitter::new();
        let (a, _sa) = counter(&emitter);
        let (b, _sb) = counter(&emitter);

        emitter.emit(NetworkEvent::HostStatusChanged(true));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_subscription_stops_delivery() {
        let emitter = EventEmitter::new();
        let (count, sub) = counter(&emitter);

        drop(sub);
        emitter.emit(NetworkEvent::ConnectionStatusChanged(true));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_cancel_only_removes_own_listener() {
        let emitter = EventEmitter::new();
        let (a, sa) = counter(&emitter);
        let (b, _sb) = counter(&emitter);

        sa.cancel();
        emitter.emit(NetworkEvent::DataReceived(vec![1]));

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_subscribe_during_emit_without_deadlock() {
        let emitter = EventEmitter::new();
        let inner = emitter.clone();
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in = Arc::clone(&held);
        let _sub = emitter.subscribe(move |_| {
            held_in.lock().unwrap().push(inner.subscribe(|_| {}));
        });

        emitter.emit(NetworkEvent::HostStatusChanged(false));

        assert_eq!(emitter.listener_count(), 2);
    }

    #[test]
    fn test_complete_failure_emits_only_failed_completion() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = emitter.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let result = emitter.complete(
            Operation::ConnectRoom,
            Err(BackendError::Rejected("Game full".into())),
        );

        assert_eq!(result, Err(BackendError::Rejected("Game full".into())));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![NetworkEvent::RoomOperationCompleted(OperationOutcome::failed(
                Operation::ConnectRoom,
                "Game full"
            ))]
        );
    }

    #[test]
    fn test_complete_success_emits_effects_first() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = emitter.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        emitter
            .complete(
                Operation::CreateLobby,
                Ok((vec![NetworkEvent::HostStatusChanged(true)], "L_1".into())),
            )
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], NetworkEvent::HostStatusChanged(true));
        assert!(seen[1].outcome().is_some_and(|o| o.success && o.message == "L_1"));
    }

    #[test]
    fn test_subscription_outliving_emitter_drops_cleanly() {
        let emitter = EventEmitter::new();
        let (_count, sub) = counter(&emitter);
        drop(emitter);
        drop(sub);
    }
}

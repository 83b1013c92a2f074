//! Observer registry behind the "state updated" notification.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Observer<T> = Box<dyn FnMut(&T) + Send + 'static>;

struct Registry<T> {
    next_id: u64,
    observers: Vec<(u64, Observer<T>)>,
    /// Cancelled while their observer was out running in `notify`.
    cancelled: HashSet<u64>,
}

impl<T> Registry<T> {
    fn cancel(&mut self, id: u64) {
        let before = self.observers.len();
        self.observers.retain(|(other, _)| *other != id);
        if self.observers.len() == before {
            self.cancelled.insert(id);
        }
    }
}

/// Fan-out of decoded values to registered observers.
///
/// Observers run on the thread that calls [`StateNotifier::notify`], which in
/// practice is the frame loop during `pump()`. The registry is not locked
/// while they run, so an observer may subscribe or cancel (itself included).
/// Changes made during a notification apply from the next one.
pub struct StateNotifier<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for StateNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> Default for StateNotifier<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                observers: Vec::new(),
                cancelled: HashSet::new(),
            })),
        }
    }
}

impl<T: 'static> StateNotifier<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: impl FnMut(&T) + Send + 'static) -> ObserverHandle {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.observers.push((id, Box::new(observer)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        ObserverHandle {
            id,
            cancel: Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().cancel(id);
                }
            }),
        }
    }

    pub fn notify(&self, value: &T) {
        let mut running = std::mem::take(&mut self.registry.lock().observers);
        for (id, observer) in running.iter_mut() {
            if self.registry.lock().cancelled.contains(id) {
                continue;
            }
            observer(value);
        }

        // Put the observers back behind any subscribed meanwhile, minus the
        // ones cancelled meanwhile.
        let mut registry = self.registry.lock();
        let cancelled = std::mem::take(&mut registry.cancelled);
        running.retain(|(id, _)| !cancelled.contains(id));
        running.append(&mut registry.observers);
        registry.observers = running;
    }

    pub fn observer_count(&self) -> usize {
        self.registry.lock().observers.len()
    }
}

/// Registration token. Dropping it keeps the observer registered; call
/// [`ObserverHandle::cancel`] to remove it.
pub struct ObserverHandle {
    id: u64,
    cancel: Box<dyn FnOnce() + Send>,
}

impl ObserverHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_observer_sees_every_value() {
        let notifier = StateNotifier::<u32>::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));

        let sink = a.clone();
        let _ha = notifier.subscribe(move |v| sink.lock().push(*v));
        let sink = b.clone();
        let _hb = notifier.subscribe(move |v| sink.lock().push(*v * 10));

        notifier.notify(&1);
        notifier.notify(&2);

        assert_eq!(*a.lock(), vec![1, 2]);
        assert_eq!(*b.lock(), vec![10, 20]);
    }

    #[test]
    fn cancel_removes_only_that_observer() {
        let notifier = StateNotifier::<u32>::new();
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        let first = notifier.subscribe(move |_| *c.lock() += 1);
        let c = count.clone();
        let second = notifier.subscribe(move |_| *c.lock() += 100);
        assert_ne!(first.id(), second.id());

        first.cancel();
        assert_eq!(notifier.observer_count(), 1);
        notifier.notify(&0);
        assert_eq!(*count.lock(), 100);
    }

    #[test]
    fn dropping_the_handle_keeps_the_observer() {
        let notifier = StateNotifier::<u32>::new();
        drop(notifier.subscribe(|_| {}));
        assert_eq!(notifier.observer_count(), 1);
    }

    #[test]
    fn cancel_after_notifier_dropped_is_harmless() {
        let notifier = StateNotifier::<u32>::new();
        let handle = notifier.subscribe(|_| {});
        drop(notifier);
        handle.cancel();
    }

    #[test]
    fn observer_can_cancel_itself_while_notified() {
        let notifier = StateNotifier::<u32>::new();
        let slot: Arc<Mutex<Option<ObserverHandle>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let own_handle = slot.clone();
        let sink = seen.clone();
        let handle = notifier.subscribe(move |v| {
            sink.lock().push(*v);
            if let Some(handle) = own_handle.lock().take() {
                handle.cancel();
            }
        });
        *slot.lock() = Some(handle);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = notifier.clone();
        std::thread::spawn(move || {
            worker.notify(&1);
            worker.notify(&2);
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(std::time::Duration::from_secs(3))
            .expect("notify returned");

        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(notifier.observer_count(), 0);
    }

    #[test]
    fn observer_can_cancel_another_mid_notification() {
        let notifier = StateNotifier::<u32>::new();
        let slot: Arc<Mutex<Option<ObserverHandle>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(Mutex::new(0));

        let victim = slot.clone();
        let _first = notifier.subscribe(move |_| {
            if let Some(handle) = victim.lock().take() {
                handle.cancel();
            }
        });
        let c = count.clone();
        let second = notifier.subscribe(move |_| *c.lock() += 1);
        *slot.lock() = Some(second);

        notifier.notify(&1);
        notifier.notify(&2);
        assert_eq!(*count.lock(), 0);
        assert_eq!(notifier.observer_count(), 1);
    }

    #[test]
    fn subscribing_from_an_observer_applies_next_time() {
        let notifier = StateNotifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles = Arc::new(Mutex::new(Vec::new()));

        let registrar = notifier.clone();
        let sink = seen.clone();
        let kept = handles.clone();
        let _outer = notifier.subscribe(move |v| {
            if *v == 1 {
                let sink = sink.clone();
                kept.lock().push(registrar.subscribe(move |v| sink.lock().push(*v)));
            }
        });

        notifier.notify(&1);
        assert!(seen.lock().is_empty());
        notifier.notify(&2);
        assert_eq!(*seen.lock(), vec![2]);
        assert_eq!(notifier.observer_count(), 2);
    }
}

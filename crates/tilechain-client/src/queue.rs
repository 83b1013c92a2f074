//! The pending-callback queue: the only structure shared between the event
//! delivery side and the frame loop.

use crossbeam_channel::{Receiver, Sender, unbounded};

/// A zero-argument thunk waiting for the next pump.
pub type PendingCallback = Box<dyn FnOnce() + Send + 'static>;

/// Create a connected sender/queue pair.
pub fn pending_queue() -> (CallbackSender, CallbackQueue) {
    let (tx, rx) = unbounded();
    (CallbackSender { tx }, CallbackQueue { rx })
}

/// Append side. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct CallbackSender {
    tx: Sender<PendingCallback>,
}

impl CallbackSender {
    /// Returns false once the queue has been dropped.
    pub fn enqueue(&self, callback: PendingCallback) -> bool {
        self.tx.send(callback).is_ok()
    }
}

/// Drain side, owned by whoever runs the frame loop.
pub struct CallbackQueue {
    rx: Receiver<PendingCallback>,
}

impl CallbackQueue {
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Run the callbacks that were queued when the drain started, in order.
    /// Anything appended meanwhile waits for the next drain.
    pub fn drain(&self) -> usize {
        let bound = self.rx.len();
        let mut ran = 0;
        while ran < bound {
            match self.rx.try_recv() {
                Ok(callback) => {
                    callback();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn drains_in_enqueue_order() {
        let (tx, queue) = pending_queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            tx.enqueue(Box::new(move || seen.lock().push(i)));
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.drain(), 5);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn callbacks_enqueued_during_drain_wait_for_next_drain() {
        let (tx, queue) = pending_queue();
        let runs = Arc::new(AtomicUsize::new(0));

        let inner_tx = tx.clone();
        let inner_runs = runs.clone();
        tx.enqueue(Box::new(move || {
            inner_runs.fetch_add(1, Ordering::SeqCst);
            let again = inner_runs.clone();
            inner_tx.enqueue(Box::new(move || {
                again.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(queue.drain(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_producer_keeps_fifo_order() {
        const TOTAL: usize = 2_000;
        let (tx, queue) = pending_queue();
        let seen = Arc::new(Mutex::new(Vec::with_capacity(TOTAL)));

        let producer = {
            let seen = seen.clone();
            thread::spawn(move || {
                for i in 0..TOTAL {
                    let seen = seen.clone();
                    tx.enqueue(Box::new(move || seen.lock().push(i)));
                    if i % 64 == 0 {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut drained = 0;
        while drained < TOTAL {
            drained += queue.drain();
            thread::yield_now();
        }
        producer.join().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), TOTAL);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn enqueue_after_queue_dropped_reports_false() {
        let (tx, queue) = pending_queue();
        drop(queue);
        assert!(!tx.enqueue(Box::new(|| {})));
    }
}

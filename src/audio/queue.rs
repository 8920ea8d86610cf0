//! # Bounded Dispatch Queue
//!
//! Hands completed audio windows from the session actor to the
//! transcription workers. The queue is small on purpose: transcription runs
//! slower than real time on loaded machines, and a deep queue would make
//! captions lag further and further behind the speaker. When full, `put`
//! evicts the oldest window so workers always pull the freshest audio.
//!
//! `put` never blocks (it runs on the actor's event loop); `take` is async
//! and parks the calling worker until a window or shutdown arrives.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use super::segmenter::AudioWindow;

struct QueueInner {
    items: VecDeque<AudioWindow>,
    closed: bool,
}

pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a window, evicting the oldest entry when full.
    ///
    /// Returns the evicted window so the caller can log the drop. Windows
    /// offered after `close` are discarded and returned unmodified.
    pub fn put(&self, window: AudioWindow) -> Option<AudioWindow> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Some(window);
        }

        let evicted = if inner.items.len() >= self.capacity {
            inner.items.pop_front()
        } else {
            None
        };

        inner.items.push_back(window);
        drop(inner);

        self.notify.notify_one();
        evicted
    }

    /// Wait for the next window. Returns `None` once the queue is closed
    /// and drained, which is the worker's signal to exit.
    pub async fn take(&self) -> Option<AudioWindow> {
        loop {
            // Register interest before checking, so a put between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(window) = inner.items.pop_front() {
                    return Some(window);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark the queue closed but let workers drain what is already queued.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);

        self.notify.notify_waiters();
    }

    /// Mark the queue closed and discard anything still pending.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.items.clear();
        drop(inner);

        self.notify.notify_waiters();
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.items.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn window(sequence: u64) -> AudioWindow {
        AudioWindow {
            sequence,
            start_sample: sequence * 100,
            samples: vec![0.0; 10],
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = DispatchQueue::new(3);
        queue.put(window(0));
        queue.put(window(1));
        queue.put(window(2));

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert_eq!(queue.take().await.unwrap().sequence, 0);
            assert_eq!(queue.take().await.unwrap().sequence, 1);
            assert_eq!(queue.take().await.unwrap().sequence, 2);
        });
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let queue = DispatchQueue::new(2);
        assert!(queue.put(window(0)).is_none());
        assert!(queue.put(window(1)).is_none());

        let evicted = queue.put(window(2));
        assert_eq!(evicted.unwrap().sequence, 0);
        assert_eq!(queue.len(), 2);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert_eq!(queue.take().await.unwrap().sequence, 1);
            assert_eq!(queue.take().await.unwrap().sequence, 2);
        });
    }

    #[test]
    fn test_take_returns_none_after_close() {
        let queue = DispatchQueue::new(2);
        queue.put(window(0));
        queue.close();

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            // Close discards pending windows
            assert!(queue.take().await.is_none());
        });
    }

    #[test]
    fn test_put_after_close_is_rejected() {
        let queue = DispatchQueue::new(2);
        queue.close();
        let rejected = queue.put(window(7));
        assert_eq!(rejected.unwrap().sequence, 7);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_wakes_on_put() {
        let queue = Arc::new(DispatchQueue::new(1));
        let rt = tokio::runtime::Runtime::new().unwrap();

        rt.block_on(async {
            let waiter = {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.take().await })
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.put(window(5));

            let taken = waiter.await.unwrap();
            assert_eq!(taken.unwrap().sequence, 5);
        });
    }

    #[test]
    fn test_close_wakes_blocked_takers() {
        let queue = Arc::new(DispatchQueue::new(1));
        let rt = tokio::runtime::Runtime::new().unwrap();

        rt.block_on(async {
            let waiter = {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.take().await })
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.close();

            assert!(waiter.await.unwrap().is_none());
        });
    }

    #[test]
    fn test_finish_drains_before_none() {
        let queue = DispatchQueue::new(2);
        queue.put(window(0));
        queue.put(window(1));
        queue.finish();

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert_eq!(queue.take().await.unwrap().sequence, 0);
            assert_eq!(queue.take().await.unwrap().sequence, 1);
            assert!(queue.take().await.is_none());
        });
    }

    #[test]
    fn test_is_full() {
        let queue = DispatchQueue::new(1);
        assert!(!queue.is_full());
        queue.put(window(0));
        assert!(queue.is_full());
    }
}

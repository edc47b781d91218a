use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{CancelToken, SyncError, CANCEL_POLL};

/// Bounded FIFO shared between one producer and any number of consumers.
///
/// `put` blocks while the buffer is full; `drain_up_to` takes whatever is
/// available right now and never waits for more. Both run under the same
/// mutex, so they are atomic with respect to each other.
pub struct SharedStorage<T> {
    queue: Mutex<VecDeque<T>>,
    not_full: Condvar,
    capacity: usize,
}

impl<T> SharedStorage<T> {
    /// Create an empty storage holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, SyncError> {
        if capacity == 0 {
            return Err(SyncError::ZeroCapacity);
        }
        Ok(Self {
            queue: Mutex::new(VecDeque::new()),
            not_full: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append `item` at the tail, waiting for space if the buffer is full.
    ///
    /// Returns `SyncError::Cancelled` without inserting once `token` is
    /// cancelled, including while blocked.
    pub fn put(&self, item: T, token: &CancelToken) -> Result<(), SyncError> {
        token.check()?;
        let mut queue = self.lock();
        while queue.len() >= self.capacity {
            trace!(capacity = self.capacity, "storage full, waiting for space");
            queue = self
                .not_full
                .wait_timeout(queue, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            token.check()?;
        }
        queue.push_back(item);
        Ok(())
    }

    /// Append without blocking; hands the item back when full.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return Err(item);
        }
        queue.push_back(item);
        Ok(())
    }

    /// Remove up to `max` items from the head in FIFO order.
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let mut queue = self.lock();
        let n = max.min(queue.len());
        let drained: Vec<T> = queue.drain(..n).collect();
        drop(queue);
        if n > 0 {
            self.not_full.notify_all();
        }
        drained
    }

    // A party that panicked while holding the lock leaves a consistent deque
    // behind: every mutation is a single push or drain.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(
            SharedStorage::<u8>::new(0).err(),
            Some(SyncError::ZeroCapacity)
        );
    }

    #[test]
    fn drain_on_empty_returns_immediately() {
        let storage = SharedStorage::<u8>::new(4).unwrap();
        let start = Instant::now();
        assert!(storage.drain_up_to(10).is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn drain_is_fifo_and_partial() {
        let storage = SharedStorage::new(10).unwrap();
        let token = CancelToken::new();
        for i in 0..6 {
            storage.put(i, &token).unwrap();
        }
        assert_eq!(storage.drain_up_to(4), vec![0, 1, 2, 3]);
        assert_eq!(storage.drain_up_to(4), vec![4, 5]);
        assert!(storage.is_empty());
    }

    #[test]
    fn try_put_hands_back_when_full() {
        let storage = SharedStorage::new(1).unwrap();
        assert_eq!(storage.try_put('a'), Ok(()));
        assert_eq!(storage.try_put('b'), Err('b'));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn put_blocks_until_space_frees() {
        let storage = Arc::new(SharedStorage::new(1).unwrap());
        let token = CancelToken::new();
        storage.put(1, &token).unwrap();

        let producer = {
            let storage = Arc::clone(&storage);
            let token = token.clone();
            thread::spawn(move || storage.put(2, &token))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.drain_up_to(1), vec![1]);
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(storage.drain_up_to(5), vec![2]);
    }

    #[test]
    fn cancel_wakes_blocked_put() {
        let storage = Arc::new(SharedStorage::new(1).unwrap());
        storage.put(1, &CancelToken::new()).unwrap();

        let token = CancelToken::new();
        let producer = {
            let storage = Arc::clone(&storage);
            let token = token.clone();
            thread::spawn(move || storage.put(2, &token))
        };
        thread::sleep(Duration::from_millis(30));
        let cancelled_at = Instant::now();
        token.cancel();
        assert_eq!(producer.join().unwrap(), Err(SyncError::Cancelled));
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(storage.drain_up_to(5), vec![1]);
    }

    #[test]
    fn put_after_cancel_inserts_nothing() {
        let storage = SharedStorage::new(4).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(storage.put(7, &token), Err(SyncError::Cancelled));
        assert!(storage.is_empty());
    }

    #[test]
    fn concurrent_drains_partition_items() {
        let storage = Arc::new(SharedStorage::new(1000).unwrap());
        let token = CancelToken::new();
        for i in 0..1000u32 {
            storage.put(i, &token).unwrap();
        }
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    loop {
                        let batch = storage.drain_up_to(7);
                        if batch.is_empty() {
                            break taken;
                        }
                        assert!(batch.windows(2).all(|w| w[0] < w[1]));
                        taken.extend(batch);
                    }
                })
            })
            .collect();
        let mut all = BTreeSet::new();
        let mut total = 0;
        for handle in consumers {
            let taken = handle.join().unwrap();
            total += taken.len();
            all.extend(taken);
        }
        assert_eq!(total, 1000);
        assert_eq!(all.len(), 1000);
    }

    proptest! {
        #[test]
        fn behaves_like_bounded_deque(
            ops in prop::collection::vec((any::<bool>(), 0usize..6), 0..64)
        ) {
            let storage = SharedStorage::new(8).unwrap();
            let mut model: VecDeque<usize> = VecDeque::new();
            for (step, (is_put, n)) in ops.into_iter().enumerate() {
                if is_put {
                    let accepted = storage.try_put(step).is_ok();
                    prop_assert_eq!(accepted, model.len() < 8);
                    if accepted {
                        model.push_back(step);
                    }
                } else {
                    let expected: Vec<usize> = model.drain(..n.min(model.len())).collect();
                    prop_assert_eq!(storage.drain_up_to(n), expected);
                }
                prop_assert_eq!(storage.len(), model.len());
            }
        }
    }
}

// Copyright 2026 locus Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Double-buffered snapshot container.
//!
//! Readers load the published copy through an [`ArcSwap`] and never contend with the writer. The writer fills the
//! staging copy and publishes it with a single atomic pointer swap. A reader that already holds an [`Arc`] keeps the
//! generation it was given.
//!
//! Writers are expected to be serialized by the caller. The staging lock only guards against misuse, it is never
//! touched by readers.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};

/// A value with a lock-free read side and a staged write side.
pub struct SnapshotCache<T> {
    published: ArcSwap<T>,
    staging: Mutex<T>,
    generation: AtomicU64,
}

impl<T> Debug for SnapshotCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> Default for SnapshotCache<T>
where
    T: Clone + Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> SnapshotCache<T>
where
    T: Clone,
{
    /// Create a snapshot cache whose published and staging copies both start as `value`.
    pub fn new(value: T) -> Self {
        Self {
            published: ArcSwap::from_pointee(value.clone()),
            staging: Mutex::new(value),
            generation: AtomicU64::new(0),
        }
    }

    /// Get the published copy.
    ///
    /// The returned [`Arc`] is an immutable snapshot. Later publishes do not affect it.
    pub fn read(&self) -> Arc<T> {
        self.published.load_full()
    }

    /// Get the staging copy for the writer to populate.
    ///
    /// Nothing written here is visible to readers until [`SnapshotCache::publish`].
    pub fn mutate(&self) -> MutexGuard<'_, T> {
        self.staging.lock()
    }

    /// Atomically replace the published copy with the current staging copy.
    ///
    /// Returns the new generation.
    pub fn publish(&self) -> u64 {
        let next = self.staging.lock().clone();
        self.published.store(Arc::new(next));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Overwrite the staging copy with `value` and publish it.
    pub fn replace(&self, value: T) -> u64 {
        *self.staging.lock() = value;
        self.publish()
    }

    /// Count of publishes since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    #[test]
    fn test_staging_invisible_until_publish() {
        let cache = SnapshotCache::new(vec![1u32]);

        cache.mutate().push(2);
        assert_eq!(*cache.read(), vec![1]);
        assert_eq!(cache.generation(), 0);

        assert_eq!(cache.publish(), 1);
        assert_eq!(*cache.read(), vec![1, 2]);
    }

    #[test]
    fn test_held_snapshot_survives_publish() {
        let cache = SnapshotCache::new(String::from("old"));
        let held = cache.read();

        cache.replace(String::from("new"));

        assert_eq!(held.as_str(), "old");
        assert_eq!(cache.read().as_str(), "new");
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn test_readers_never_observe_partial_state() {
        // Every published vector is uniform, so a mixed vector means a torn read.
        let cache = Arc::new(SnapshotCache::new(vec![0u64; 64]));
        let barrier = Arc::new(Barrier::new(5));

        let readers = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..10_000 {
                        let snapshot = cache.read();
                        let first = snapshot[0];
                        assert!(snapshot.iter().all(|v| *v == first));
                    }
                })
            })
            .collect::<Vec<_>>();

        barrier.wait();
        for round in 1..=1_000u64 {
            {
                let mut staging = cache.mutate();
                for v in staging.iter_mut() {
                    *v = round;
                }
            }
            cache.publish();
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cache.generation(), 1_000);
    }
}

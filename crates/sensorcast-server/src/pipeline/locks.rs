//! Keyed writer locks, one per sensor type.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use sensorcast::SensorType;

/// Registry of exclusive writer locks keyed by sensor type.
///
/// A cycle for one sensor type holds its lock from history append through
/// the reconciled write, so same-sensor cycles never interleave. Different
/// sensor types proceed in parallel.
///
/// The locks live in process memory. Two processes writing the same data
/// directory are not serialized against each other, so a directory must be
/// owned by a single running service.
#[derive(Default)]
pub struct SensorLocks {
    locks: DashMap<SensorType, Arc<Mutex<()>>>,
}

impl SensorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the sensor's writer lock. Blocks the calling thread.
    pub fn with_lock<R>(&self, sensor: SensorType, f: impl FnOnce() -> R) -> R {
        let lock = self.get_or_create(sensor);
        // A panicked holder leaves no partial state: documents are replaced atomically.
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn get_or_create(&self, sensor: SensorType) -> Arc<Mutex<()>> {
        self.locks
            .entry(sensor)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of sensor types that have been locked at least once.
    pub fn count(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_sensor_is_exclusive() {
        let locks = Arc::new(SensorLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    locks.with_lock(SensorType::Temperature, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.count(), 1);
    }

    #[test]
    fn test_locks_are_per_sensor() {
        let locks = SensorLocks::new();
        let value = locks.with_lock(SensorType::Humidity, || {
            locks.with_lock(SensorType::Pressure, || 7)
        });
        assert_eq!(value, 7);
        assert_eq!(locks.count(), 2);
    }
}

//! Memory pressure monitor
//!
//! A dedicated thread samples process RSS every 500 ms. Over the soft
//! limit it halves cache capacity; over the hard limit it flushes the
//! cache and disables write-back coalescing until RSS drops below 90 % of
//! the soft limit. The monitor reports through plain `tracing` only — it
//! must never write entities, or collection would generate work about
//! collection, ad infinitum.

use crate::cache::EntityCache;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Sampling cadence
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Pressure thresholds in bytes
#[derive(Debug, Clone, Copy)]
pub struct PressureLimits {
    /// Above this, cache capacities are halved
    pub soft_bytes: u64,
    /// Above this, caches are flushed and coalescing disabled
    pub hard_bytes: u64,
}

impl Default for PressureLimits {
    fn default() -> Self {
        PressureLimits {
            soft_bytes: 512 * 1024 * 1024,
            hard_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PressureState {
    Normal,
    Soft,
    Hard,
}

/// Handle to the running monitor thread
pub struct PressureMonitor {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

struct Shutdown {
    flag: AtomicBool,
    gate: Mutex<()>,
    cond: Condvar,
}

impl PressureMonitor {
    /// Spawn the monitor thread
    ///
    /// `coalescing` is shared with the writer: the monitor clears it under
    /// hard pressure and restores it on recovery.
    pub fn spawn(
        limits: PressureLimits,
        cache: Arc<EntityCache>,
        coalescing: Arc<AtomicBool>,
    ) -> Self {
        let shutdown = Arc::new(Shutdown {
            flag: AtomicBool::new(false),
            gate: Mutex::new(()),
            cond: Condvar::new(),
        });
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("entitydb-pressure".to_string())
            .spawn(move || monitor_loop(limits, cache, coalescing, thread_shutdown))
            .expect("failed to spawn pressure monitor thread");

        PressureMonitor {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the monitor and join the thread
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal_stop(&self) {
        self.shutdown.flag.store(true, Ordering::Release);
        let _gate = self.shutdown.gate.lock();
        self.shutdown.cond.notify_all();
    }
}

impl Drop for PressureMonitor {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn monitor_loop(
    limits: PressureLimits,
    cache: Arc<EntityCache>,
    coalescing: Arc<AtomicBool>,
    shutdown: Arc<Shutdown>,
) {
    let baseline_capacity = cache.capacity();
    let recover_below = limits.soft_bytes - limits.soft_bytes / 10;
    let mut state = PressureState::Normal;

    loop {
        {
            let mut gate = shutdown.gate.lock();
            if shutdown.flag.load(Ordering::Acquire) {
                return;
            }
            shutdown.cond.wait_for(&mut gate, SAMPLE_INTERVAL);
            if shutdown.flag.load(Ordering::Acquire) {
                return;
            }
        }

        let Some(rss) = sample_rss_bytes() else {
            continue;
        };

        let next = if rss > limits.hard_bytes {
            PressureState::Hard
        } else if rss > limits.soft_bytes {
            PressureState::Soft
        } else if rss < recover_below {
            PressureState::Normal
        } else {
            // Between recovery threshold and soft limit: hold the line
            state
        };

        if next == state {
            continue;
        }

        match next {
            PressureState::Soft => {
                let halved = (cache.capacity() / 2).max(1);
                warn!(
                    target: "entitydb::pressure",
                    rss_bytes = rss,
                    new_capacity = halved,
                    "soft memory limit exceeded, halving cache capacity"
                );
                cache.set_capacity(halved);
            }
            PressureState::Hard => {
                warn!(
                    target: "entitydb::pressure",
                    rss_bytes = rss,
                    "hard memory limit exceeded, flushing caches and disabling coalescing"
                );
                cache.clear();
                coalescing.store(false, Ordering::Release);
            }
            PressureState::Normal => {
                info!(
                    target: "entitydb::pressure",
                    rss_bytes = rss,
                    restored_capacity = baseline_capacity,
                    "memory pressure cleared"
                );
                cache.set_capacity(baseline_capacity);
                coalescing.store(true, Ordering::Release);
            }
        }
        state = next;
    }
}

/// Sample process RSS in bytes
///
/// Linux reads `/proc/self/statm`; elsewhere the monitor is inert.
pub fn sample_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident_pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_stop() {
        let cache = Arc::new(EntityCache::new(64));
        let coalescing = Arc::new(AtomicBool::new(true));
        let monitor =
            PressureMonitor::spawn(PressureLimits::default(), cache, coalescing.clone());
        monitor.stop();
        // Default limits are generous; coalescing stays enabled
        assert!(coalescing.load(Ordering::Acquire));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rss_sampling_works_on_linux() {
        let rss = sample_rss_bytes().unwrap();
        assert!(rss > 0);
    }

    #[test]
    fn test_hard_pressure_flushes_and_disables_coalescing() {
        let cache = Arc::new(EntityCache::new(64));
        let coalescing = Arc::new(AtomicBool::new(true));
        // Hard limit of 0 bytes: any process exceeds it immediately
        let limits = PressureLimits {
            soft_bytes: 0,
            hard_bytes: 0,
        };
        let monitor = PressureMonitor::spawn(limits, cache, coalescing.clone());
        // Wait out at least one sample interval
        std::thread::sleep(SAMPLE_INTERVAL + Duration::from_millis(200));
        monitor.stop();
        if sample_rss_bytes().is_some() {
            assert!(!coalescing.load(Ordering::Acquire));
        }
    }
}

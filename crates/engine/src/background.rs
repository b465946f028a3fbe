//! Background interval workers
//!
//! Small named threads running a task on a fixed cadence: the tag-index
//! merge (250 ms), the group-commit flush, and the session sweeper all
//! ride on this. A condvar-backed shutdown flag keeps stop() prompt
//! instead of waiting out the interval.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

struct WorkerShutdown {
    flag: AtomicBool,
    gate: Mutex<()>,
    cond: Condvar,
}

/// A named thread running a task every `interval`
pub struct IntervalWorker {
    shutdown: Arc<WorkerShutdown>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalWorker {
    /// Spawn the worker thread
    pub fn spawn(
        name: &str,
        interval: Duration,
        mut task: impl FnMut() + Send + 'static,
    ) -> Self {
        let shutdown = Arc::new(WorkerShutdown {
            flag: AtomicBool::new(false),
            gate: Mutex::new(()),
            cond: Condvar::new(),
        });
        let thread_shutdown = shutdown.clone();
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("entitydb-{}", name))
            .spawn(move || {
                debug!(target: "entitydb::background", worker = %thread_name, "worker started");
                loop {
                    {
                        let mut gate = thread_shutdown.gate.lock();
                        if thread_shutdown.flag.load(Ordering::Acquire) {
                            return;
                        }
                        thread_shutdown.cond.wait_for(&mut gate, interval);
                        if thread_shutdown.flag.load(Ordering::Acquire) {
                            return;
                        }
                    }
                    task();
                }
            })
            .expect("failed to spawn background worker thread");

        IntervalWorker {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the worker and join its thread
    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal(&self) {
        self.shutdown.flag.store(true, Ordering::Release);
        let _gate = self.shutdown.gate.lock();
        self.shutdown.cond.notify_all();
    }
}

impl Drop for IntervalWorker {
    fn drop(&mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

//! Worker thread plumbing: a named OS thread with start / request-stop /
//! join, plus the park/wake pair a worker sleeps on while its cluster has
//! nothing queued.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use codec_cluster_core::ClusterError;
use serde::Serialize;
use tracing::error;

use crate::metrics::WorkerMetrics;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Worker activity as seen by producers deciding whom to wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Claiming or running nodes.
    Running,
    /// Parked (or about to park) waiting for a wake.
    Idle,
    /// Exited its loop.
    Stopped,
}

impl WorkerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Running,
            1 => WorkerState::Idle,
            _ => WorkerState::Stopped,
        }
    }
}

/// State shared between a worker thread, its cluster and its owner.
#[derive(Debug)]
pub(crate) struct ThreadControl {
    name: String,
    state: AtomicU8,
    stop: AtomicBool,
    woken: Mutex<bool>,
    cond: Condvar,
    stats: Mutex<WorkerMetrics>,
}

impl ThreadControl {
    pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            stats: Mutex::new(WorkerMetrics::new(&name)),
            name,
            state: AtomicU8::new(WorkerState::Running as u8),
            stop: AtomicBool::new(false),
            woken: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Announce that the worker found nothing and is about to park.
    pub(crate) fn set_idle(&self) {
        self.state.store(WorkerState::Idle as u8, Ordering::SeqCst);
    }

    pub(crate) fn set_stopped(&self) {
        self.state.store(WorkerState::Stopped as u8, Ordering::SeqCst);
    }

    /// Move Idle → Running. Whoever wins this CAS owns waking the worker.
    pub(crate) fn try_activate(&self) -> bool {
        self.state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Wake the worker if it is idle. Returns whether it was.
    pub(crate) fn wake_if_idle(&self) -> bool {
        if !self.try_activate() {
            return false;
        }
        self.wake();
        true
    }

    fn wake(&self) {
        let mut woken = lock(&self.woken);
        *woken = true;
        self.cond.notify_one();
    }

    /// Block until woken or asked to stop. Consumes the wake.
    pub(crate) fn park(&self) {
        let mut woken = lock(&self.woken);
        while !*woken && !self.stop_requested() {
            woken = self
                .cond
                .wait(woken)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *woken = false;
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Take the lock so a worker between its check and its wait sees the flag
        let _guard = lock(&self.woken);
        self.cond.notify_all();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> MutexGuard<'_, WorkerMetrics> {
        lock(&self.stats)
    }

    /// Stats snapshot with the live state filled in.
    pub(crate) fn snapshot(&self) -> WorkerMetrics {
        let mut snapshot = self.stats().clone();
        snapshot.state = self.state();
        snapshot
    }
}

/// A named OS thread driven by a [`ThreadControl`].
///
/// Created stopped; [`start`](Self::start) spawns it with an entry function.
/// Dropping a started thread requests a stop and joins it.
#[derive(Debug)]
pub(crate) struct WorkerThread {
    control: Arc<ThreadControl>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub(crate) fn new(control: Arc<ThreadControl>) -> Self {
        Self {
            control,
            handle: None,
        }
    }

    pub(crate) fn start<F>(&mut self, entry: F) -> Result<(), ClusterError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(self.control.name().to_string())
            .spawn(entry)
            .map_err(|e| ClusterError::ThreadSpawn(format!("{}: {}", self.control.name(), e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub(crate) fn request_stop(&self) {
        self.control.request_stop();
    }

    /// Wait for the thread to exit. No-op if it was never started or
    /// already joined.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = %self.control.name(), "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            self.join();
        }
    }
}

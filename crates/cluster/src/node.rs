//! Work units.
//!
//! A [`Node`] is owned by whoever created it (typically one codec channel).
//! Attaching it to a cluster binds it to a priority queue; from then on any
//! thread can [`schedule`](Node::schedule) it and the cluster's workers run
//! its work function, never on two workers at once. [`Node::detach`] blocks
//! until the node is guaranteed never to run again.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use codec_cluster_core::{ClusterError, DebugFlags};
use tracing::{debug, error, warn};

use crate::cluster::ClusterShared;
use crate::metrics::NodeStats;
use crate::state::{AtomicNodeState, FinishStep, NodeState, ScheduleStep};
use crate::task::{Work, WorkError};
use crate::thread::lock;
use crate::types::{NodeId, Priority};

/// How often a blocked detach checks whether its cluster is gone.
const DETACH_POLL: Duration = Duration::from_millis(100);

/// What a call to `schedule()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The node was idle and is now queued.
    Queued,
    /// A run was already pending; nothing changed.
    Pending,
    /// The node is running; it will run once more afterwards.
    Signalled,
    /// The node is not attached (never was, or already detached).
    Ignored,
}

/// Where a node lives once attached.
#[derive(Debug)]
pub(crate) struct Binding {
    pub(crate) cluster: Arc<ClusterShared>,
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) priority: Priority,
}

/// Result of running a node once, reported to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunResult {
    /// The work function ran and returned `Ok`.
    Done,
    /// The work function returned an error or panicked.
    Failed,
    /// Nothing ran: no work bound.
    Skipped,
}

pub(crate) struct NodeInner {
    state: AtomicNodeState,
    work: Mutex<Option<Box<dyn Work>>>,
    binding: OnceLock<Binding>,
    detached: Mutex<Option<oneshot::Sender<()>>>,
    runs: AtomicU64,
    failures: AtomicU64,
    run_nanos: AtomicU64,
}

impl NodeInner {
    fn new(work: Option<Box<dyn Work>>) -> Self {
        Self {
            state: AtomicNodeState::default(),
            work: Mutex::new(work),
            binding: OnceLock::new(),
            detached: Mutex::new(None),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            run_nanos: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.binding.get().map_or("unattached", |b| b.name.as_str())
    }

    pub(crate) fn state(&self) -> NodeState {
        self.state.load()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    fn binding(&self) -> &Binding {
        match self.binding.get() {
            Some(binding) => binding,
            None => panic!("node in state {} has no cluster binding", self.state.load()),
        }
    }

    fn debug_enabled(&self, flag: DebugFlags) -> bool {
        self.binding
            .get()
            .is_some_and(|b| b.cluster.debug().contains(flag))
    }

    /// Bind to a cluster and make the node schedulable.
    ///
    /// `make` runs only for the caller that wins the binding, so a losing
    /// concurrent attach never draws a node id.
    pub(crate) fn bind(&self, make: impl FnOnce() -> Binding) -> Result<(), ClusterError> {
        let mut won = false;
        let binding = self.binding.get_or_init(|| {
            won = true;
            make()
        });
        if !won {
            return Err(ClusterError::AlreadyAttached(binding.name.clone()));
        }
        self.state.store(NodeState::VALID.with(NodeState::IDLE));
        if self.debug_enabled(DebugFlags::FLOW) {
            debug!(node = %binding.name, "attached");
        }
        Ok(())
    }

    pub(crate) fn schedule(self: &Arc<Self>) -> ScheduleOutcome {
        let mut current = self.state.load();
        loop {
            let (next, outcome) = match current.schedule_step() {
                ScheduleStep::Pending => return ScheduleOutcome::Pending,
                ScheduleStep::Invalid => {
                    warn!(node = %self.name(), state = %current, "schedule on a node that is not attached");
                    return ScheduleOutcome::Ignored;
                }
                ScheduleStep::Enqueue(next) => (next, ScheduleOutcome::Queued),
                ScheduleStep::Signal(next) => (next, ScheduleOutcome::Signalled),
            };
            match self.state.compare_exchange(current, next) {
                Ok(_) => {
                    if self.debug_enabled(DebugFlags::STATUS) {
                        debug!(node = %self.name(), from = %current, to = %next, "schedule");
                    }
                    let binding = self.binding();
                    if outcome == ScheduleOutcome::Queued {
                        binding.cluster.enqueue(Arc::clone(self), binding.priority);
                    }
                    binding.cluster.wake_one();
                    return outcome;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// WAIT → RUN. Called by the queue under its lock.
    pub(crate) fn start_run(&self) {
        let mut current = self.state.load();
        loop {
            // VALID may be cleared concurrently; retry with the fresh word
            let next = current.claim_step();
            match self.state.compare_exchange(current, next) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Invoke the work function once. The node must be RUN and owned by the
    /// calling worker. Runs even when detach is pending; `finish_run`
    /// finalizes afterwards.
    pub(crate) fn run_work(self: &Arc<Self>) -> (RunResult, Duration) {
        let Some(mut work) = lock(&self.work).take() else {
            return (RunResult::Skipped, Duration::ZERO);
        };

        let trigger = Trigger {
            inner: Arc::clone(self),
        };
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.run(&trigger)));
        let elapsed = started.elapsed();

        // A replacement bound while running wins over the one we took out
        {
            let mut slot = lock(&self.work);
            if slot.is_none() {
                *slot = Some(work);
            }
        }

        self.runs.fetch_add(1, Ordering::Relaxed);
        self.run_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);

        let result = match outcome {
            Ok(Ok(())) => RunResult::Done,
            Ok(Err(WorkError::Skipped(reason))) => {
                debug!(node = %self.name(), %reason, "work skipped");
                RunResult::Done
            }
            Ok(Err(e)) => {
                warn!(node = %self.name(), error = %e, "work failed");
                RunResult::Failed
            }
            Err(_) => {
                error!(node = %self.name(), "work function panicked");
                RunResult::Failed
            }
        };
        if result == RunResult::Failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if self.debug_enabled(DebugFlags::TIMING) {
            debug!(node = %self.name(), elapsed = ?elapsed, "run");
        }
        (result, elapsed)
    }

    /// Decide where the node goes after a run: finalize a pending detach,
    /// requeue a signalled node, or go idle.
    pub(crate) fn finish_run(self: &Arc<Self>) {
        let mut current = self.state.load();
        loop {
            let step = current.finish_step();
            let next = match step {
                FinishStep::Finalize(next) | FinishStep::Requeue(next) | FinishStep::Idle(next) => next,
            };
            match self.state.compare_exchange(current, next) {
                Ok(_) => {
                    if self.debug_enabled(DebugFlags::STATUS) {
                        debug!(node = %self.name(), from = %current, to = %next, "finish");
                    }
                    match step {
                        FinishStep::Finalize(_) => self.release_detach(),
                        FinishStep::Requeue(_) => {
                            let binding = self.binding();
                            binding.cluster.enqueue(Arc::clone(self), binding.priority);
                        }
                        FinishStep::Idle(_) => {}
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release_detach(&self) {
        if self.debug_enabled(DebugFlags::FLOW) {
            debug!(node = %self.name(), "finalized");
        }
        let sender = lock(&self.detached).take();
        match sender {
            Some(tx) => {
                // The detaching caller holds the receiver until we send
                let _ = tx.send(());
            }
            None => panic!("node {} finalized without a pending detach", self.name()),
        }
    }

    /// Clear VALID and block until a worker finalizes the node.
    fn detach(self: &Arc<Self>) -> NodeStats {
        assert!(self.is_bound(), "detach of a node that was never attached");
        let binding = self.binding();

        let (tx, rx) = oneshot::channel();
        *lock(&self.detached) = Some(tx);

        let previous = self.state.clear_valid();
        assert!(
            previous.is_valid(),
            "node {} detached twice (state {})",
            binding.name,
            previous
        );
        if self.debug_enabled(DebugFlags::FLOW) {
            debug!(node = %binding.name, state = %previous, "detach requested");
        }

        if binding.cluster.is_stopped() {
            self.abandon();
        } else {
            // Make sure a worker looks at the node even if it was idle
            self.schedule();
            self.wait_finalized(&rx);
        }
        binding.cluster.node_detached();

        let stats = self.stats();
        debug!(
            node = %binding.name,
            runs = stats.runs,
            failures = stats.failures,
            run_time = ?stats.run_time,
            "node detached"
        );
        stats
    }

    fn wait_finalized(&self, rx: &oneshot::Receiver<()>) {
        let binding = self.binding();
        loop {
            match rx.recv_timeout(DETACH_POLL) {
                Ok(()) => return,
                Err(oneshot::RecvTimeoutError::Timeout) => {
                    if binding.cluster.is_stopped() {
                        // Workers are joined: a finalize either already
                        // happened or never will
                        if rx.try_recv().is_ok() {
                            return;
                        }
                        self.abandon();
                        return;
                    }
                }
                Err(oneshot::RecvTimeoutError::Disconnected) => {
                    error!(node = %binding.name, "detach released without finalize");
                    return;
                }
            }
        }
    }

    /// Finalize without a worker once the cluster is gone. Drops every
    /// reference the dead cluster could still hold to the node.
    fn abandon(&self) {
        let binding = self.binding();
        error!(node = %binding.name, state = %self.state.load(), "detach after cluster teardown");
        binding.cluster.dequeue(self, binding.priority);
        lock(&self.detached).take();
        self.state.store(NodeState::empty());
    }

    pub(crate) fn stats(&self) -> NodeStats {
        NodeStats {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            run_time: Duration::from_nanos(self.run_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for NodeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInner")
            .field("name", &self.name())
            .field("state", &self.state.load())
            .field("runs", &self.runs.load(Ordering::Relaxed))
            .finish()
    }
}

/// A caller-owned work unit.
///
/// Created detached. Attach it with
/// [`ClusterRegistry::attach`](crate::ClusterRegistry::attach); it runs once
/// right away and again after every [`schedule`](Self::schedule). A node can
/// be attached only once. Dropping an attached node detaches it.
///
/// # Example
/// ```ignore
/// let node = Node::with_work(|_t: &Trigger| {
///     decode_pending_frames();
///     Ok(())
/// });
/// registry.attach(&node, ClientType::DECODER, Priority::P1)?;
/// node.schedule();
/// let stats = node.detach();
/// ```
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node with no work function bound yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NodeInner::new(None)),
        }
    }

    /// Create a node running `work`.
    pub fn with_work<F>(work: F) -> Self
    where
        F: FnMut(&Trigger) -> Result<(), WorkError> + Send + 'static,
    {
        Self::with_task(work)
    }

    /// Create a node running a [`Work`] implementation.
    pub fn with_task<W: Work + 'static>(work: W) -> Self {
        Self {
            inner: Arc::new(NodeInner::new(Some(Box::new(work)))),
        }
    }

    /// Bind or replace the work function. A replacement made while the node
    /// runs takes effect on the next run.
    pub fn set_work<F>(&self, work: F)
    where
        F: FnMut(&Trigger) -> Result<(), WorkError> + Send + 'static,
    {
        self.set_task(work);
    }

    pub fn set_task<W: Work + 'static>(&self, work: W) {
        *lock(&self.inner.work) = Some(Box::new(work));
    }

    /// Request that the work function runs at least once more.
    pub fn schedule(&self) -> ScheduleOutcome {
        self.inner.schedule()
    }

    /// A cloneable handle other threads can use to schedule this node.
    pub fn trigger(&self) -> Trigger {
        Trigger {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_bound()
    }

    /// Cluster-scoped id, once attached.
    pub fn id(&self) -> Option<NodeId> {
        self.inner.binding.get().map(|b| b.id)
    }

    /// `{cluster}:{id}`, once attached.
    pub fn name(&self) -> Option<&str> {
        self.inner.binding.get().map(|b| b.name.as_str())
    }

    pub fn priority(&self) -> Option<Priority> {
        self.inner.binding.get().map(|b| b.priority)
    }

    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    pub fn stats(&self) -> NodeStats {
        self.inner.stats()
    }

    /// Stop scheduling this node. Blocks until any in-flight run finishes
    /// and returns the node's final statistics.
    ///
    /// Must not be called from the node's own work function.
    ///
    /// # Panics
    /// If the node was never attached.
    pub fn detach(self) -> NodeStats {
        self.inner.detach()
    }

    pub(crate) fn inner(&self) -> &Arc<NodeInner> {
        &self.inner
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.inner.is_bound() && self.inner.state().is_valid() {
            self.inner.detach();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name())
            .field("state", &self.inner.state())
            .finish()
    }
}

/// Handle for scheduling a node from any thread.
///
/// Work functions receive one for their own node. A trigger does not keep
/// the node attached; scheduling after detach is ignored.
#[derive(Clone)]
pub struct Trigger {
    inner: Arc<NodeInner>,
}

impl Trigger {
    pub fn schedule(&self) -> ScheduleOutcome {
        self.inner.schedule()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    pub fn stats(&self) -> NodeStats {
        self.inner.stats()
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.inner.name())
            .field("state", &self.inner.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_detached() {
        let node = Node::new();
        assert!(!node.is_attached());
        assert_eq!(node.state(), NodeState::empty());
        assert_eq!(node.id(), None);
        assert_eq!(node.name(), None);
        assert_eq!(node.stats(), NodeStats::default());
    }

    #[test]
    fn schedule_before_attach_is_ignored() {
        let node = Node::with_work(|_t: &Trigger| Ok(()));
        assert_eq!(node.schedule(), ScheduleOutcome::Ignored);
        assert_eq!(node.trigger().schedule(), ScheduleOutcome::Ignored);
        assert_eq!(node.state(), NodeState::empty());
    }

    #[test]
    fn drop_unattached_node_is_fine() {
        let node = Node::new();
        node.set_work(|_t| Ok(()));
        drop(node);
    }

    #[test]
    #[should_panic(expected = "never attached")]
    fn detach_unattached_panics() {
        Node::new().detach();
    }

    #[test]
    fn trigger_debug_shows_unattached() {
        let node = Node::new();
        let dbg = format!("{:?}", node.trigger());
        assert!(dbg.contains("unattached"));
    }
}

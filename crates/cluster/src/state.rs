//! Node state word.
//!
//! A node's whole scheduling state lives in one `u32` of orthogonal flags.
//! Exactly one of `IDLE`, `WAIT` and `RUN` is set while a node is attached;
//! `SIGNAL` rides along with `RUN` only. `VALID` is cleared once, by detach.
//! A node that was never attached, or whose detach has been finalized,
//! holds no flags at all.
//!
//! The transition rules are pure functions on [`NodeState`] so the CAS loops
//! in `node.rs` and the worker stay short.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Snapshot of a node's state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeState(u32);

impl NodeState {
    /// The node may still be scheduled.
    pub const VALID: NodeState = NodeState(0x1);
    /// Attached, not queued, not running.
    pub const IDLE: NodeState = NodeState(0x2);
    /// Sitting on a priority queue.
    pub const WAIT: NodeState = NodeState(0x4);
    /// Claimed by a worker.
    pub const RUN: NodeState = NodeState(0x8);
    /// Rescheduled while running.
    pub const SIGNAL: NodeState = NodeState(0x10);

    pub const fn empty() -> Self {
        NodeState(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: NodeState) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: NodeState) -> NodeState {
        NodeState(self.0 | other.0)
    }

    pub const fn without(self, other: NodeState) -> NodeState {
        NodeState(self.0 & !other.0)
    }

    pub fn is_idle(self) -> bool {
        self.contains(NodeState::IDLE)
    }

    pub fn is_waiting(self) -> bool {
        self.contains(NodeState::WAIT)
    }

    pub fn is_running(self) -> bool {
        self.contains(NodeState::RUN)
    }

    pub fn is_valid(self) -> bool {
        self.contains(NodeState::VALID)
    }

    /// What `schedule()` should do from this state.
    pub(crate) fn schedule_step(self) -> ScheduleStep {
        if self.contains(NodeState::WAIT) {
            ScheduleStep::Pending
        } else if self.contains(NodeState::IDLE) {
            ScheduleStep::Enqueue(self.without(NodeState::IDLE).with(NodeState::WAIT))
        } else if self.contains(NodeState::RUN) {
            if self.contains(NodeState::SIGNAL) {
                ScheduleStep::Pending
            } else {
                ScheduleStep::Signal(self.with(NodeState::SIGNAL))
            }
        } else {
            ScheduleStep::Invalid
        }
    }

    /// State after a worker claims the node off its queue.
    pub(crate) fn claim_step(self) -> NodeState {
        assert!(
            self.contains(NodeState::WAIT),
            "claimed node is not waiting (state {})",
            self
        );
        self.without(NodeState::WAIT).with(NodeState::RUN)
    }

    /// Where the node goes once its callback returned.
    pub(crate) fn finish_step(self) -> FinishStep {
        assert!(
            self.contains(NodeState::RUN),
            "finishing node is not running (state {})",
            self
        );
        if !self.contains(NodeState::VALID) {
            FinishStep::Finalize(NodeState::empty())
        } else if self.contains(NodeState::SIGNAL) {
            FinishStep::Requeue(
                self.without(NodeState::RUN)
                    .without(NodeState::SIGNAL)
                    .with(NodeState::WAIT),
            )
        } else {
            FinishStep::Idle(self.without(NodeState::RUN).with(NodeState::IDLE))
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(NodeState, &str); 5] = [
            (NodeState::VALID, "VALID"),
            (NodeState::IDLE, "IDLE"),
            (NodeState::WAIT, "WAIT"),
            (NodeState::RUN, "RUN"),
            (NodeState::SIGNAL, "SIGNAL"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("DETACHED")?;
        }
        Ok(())
    }
}

/// Transition chosen by `schedule()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleStep {
    /// Already queued, or a re-run is already signalled.
    Pending,
    /// Idle: move to WAIT and push onto the queue.
    Enqueue(NodeState),
    /// Running: set SIGNAL so the worker re-queues it.
    Signal(NodeState),
    /// Not attached, or already finalized.
    Invalid,
}

/// Transition chosen by a worker after running a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishStep {
    /// Detach requested: release the node.
    Finalize(NodeState),
    /// Signalled while running: back to the queue tail.
    Requeue(NodeState),
    /// Nothing pending.
    Idle(NodeState),
}

/// Atomic cell holding a [`NodeState`].
#[derive(Debug, Default)]
pub(crate) struct AtomicNodeState(AtomicU32);

impl AtomicNodeState {
    pub(crate) fn load(&self) -> NodeState {
        NodeState(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: NodeState) {
        self.0.store(state.0, Ordering::Release);
    }

    pub(crate) fn compare_exchange(&self, current: NodeState, new: NodeState) -> Result<NodeState, NodeState> {
        self.0
            .compare_exchange(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(NodeState)
            .map_err(NodeState)
    }

    /// Clear `VALID`, returning the previous state.
    pub(crate) fn clear_valid(&self) -> NodeState {
        NodeState(self.0.fetch_and(!NodeState::VALID.0, Ordering::AcqRel))
    }
}

//! Scheduled-task queue for one node.
//!
//! Periodic emissions, the delayed flush of queued messages and the expiry
//! sweep are plain data (kind + due time) kept in a min-heap, and are
//! handed back to the node in time order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::time::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Hello,
    Tc,
    Mid,
    Hna,
    /// Flush the outbound message queue into packets.
    SendQueued,
    /// Sweep expired tuples.
    Expire,
}

/// A task with its due time and a sequence number ordering same-time tasks.
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub due: Time,
    pub seq: u64,
    pub kind: TaskKind,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest due, then lowest seq, is greatest.
        match other.due.cmp(&self.due) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Task>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Time, kind: TaskKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Task { due, seq, kind });
    }

    /// Schedule `kind` at `due` unless an equal or earlier one is pending.
    ///
    /// Returns true if a task was added.
    pub fn schedule_once(&mut self, due: Time, kind: TaskKind) -> bool {
        let pending = self
            .queue
            .iter()
            .any(|t| t.kind == kind && t.due <= due);
        if pending {
            return false;
        }
        self.schedule(due, kind);
        true
    }

    /// Due time of the earliest pending task of `kind`.
    pub fn due_of(&self, kind: TaskKind) -> Option<Time> {
        self.queue
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.due)
            .min()
    }

    /// Due time of the earliest pending task.
    pub fn next_due(&self) -> Option<Time> {
        self.queue.peek().map(|t| t.due)
    }

    /// Remove and return the earliest task if it is due at or before `now`.
    pub fn pop_due(&mut self, now: Time) -> Option<Task> {
        if self.queue.peek()?.due > now {
            return None;
        }
        self.queue.pop()
    }

    /// Drop every pending task of `kind`.
    pub fn cancel(&mut self, kind: TaskKind) -> usize {
        let before = self.queue.len();
        self.queue.retain(|t| t.kind != kind);
        before - self.queue.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_then_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule(Time::from_secs(5), TaskKind::Tc);
        s.schedule(Time::from_secs(1), TaskKind::Hello);
        s.schedule(Time::from_secs(1), TaskKind::Expire);

        assert_eq!(s.next_due(), Some(Time::from_secs(1)));
        assert!(s.pop_due(Time::ZERO).is_none());

        let now = Time::from_secs(10);
        let kinds: Vec<_> = std::iter::from_fn(|| s.pop_due(now)).map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TaskKind::Hello, TaskKind::Expire, TaskKind::Tc]);
        assert!(s.is_empty());
    }

    #[test]
    fn pop_due_leaves_future_tasks() {
        let mut s = Scheduler::new();
        s.schedule(Time::from_secs(1), TaskKind::Hello);
        s.schedule(Time::from_secs(3), TaskKind::Hello);
        assert_eq!(s.pop_due(Time::from_secs(2)).unwrap().due, Time::from_secs(1));
        assert!(s.pop_due(Time::from_secs(2)).is_none());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn schedule_once_keeps_earliest() {
        let mut s = Scheduler::new();
        assert!(s.schedule_once(Time::from_secs(4), TaskKind::Expire));
        assert!(!s.schedule_once(Time::from_secs(6), TaskKind::Expire));
        assert!(s.schedule_once(Time::from_secs(2), TaskKind::Expire));
        assert_eq!(s.due_of(TaskKind::Expire), Some(Time::from_secs(2)));
        assert_eq!(s.due_of(TaskKind::Hello), None);
        assert_eq!(s.cancel(TaskKind::Expire), 2);
        assert!(s.next_due().is_none());
    }
}

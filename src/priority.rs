use std::{cmp::Reverse, collections::BTreeMap};

/// The urgency of a stream request.
///
/// Ordered from least to most urgent, so `Priority::Highest` compares
/// greater than every other level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Only used by preconnects that must not compete with real requests.
    Throttled,
    /// Speculative work, e.g. preconnects.
    #[default]
    Idle,
    /// Background requests.
    Lowest,
    /// Subresources that can wait.
    Low,
    /// Regular requests.
    Medium,
    /// Requests blocking the user.
    Highest,
}

/// Position of a value inside a [`PriorityQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pointer {
    priority: Priority,
    seq: u64,
}

impl Pointer {
    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    fn slot(&self) -> (Reverse<Priority>, u64) {
        (Reverse(self.priority), self.seq)
    }
}

/// A queue ordered by priority, first-in first-out within a priority.
#[derive(Debug)]
pub(crate) struct PriorityQueue<T> {
    slots: BTreeMap<(Reverse<Priority>, u64), T>,
    next_seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        PriorityQueue {
            slots: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> PriorityQueue<T> {
    pub(crate) fn insert(&mut self, value: T, priority: Priority) -> Pointer {
        let pointer = Pointer {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.slots.insert(pointer.slot(), value);
        pointer
    }

    pub(crate) fn erase(&mut self, pointer: Pointer) -> Option<T> {
        self.slots.remove(&pointer.slot())
    }

    /// Moves a value to the back of its new priority.
    pub(crate) fn change_priority(&mut self, pointer: Pointer, priority: Priority) -> Option<Pointer> {
        let value = self.erase(pointer)?;
        Some(self.insert(value, priority))
    }

    pub(crate) fn pop_first_max(&mut self) -> Option<T> {
        self.slots.pop_first().map(|(_, value)| value)
    }

    pub(crate) fn highest_priority(&self) -> Option<Priority> {
        self.slots.keys().next().map(|(Reverse(priority), _)| *priority)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

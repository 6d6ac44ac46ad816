use crate::types::{Priority, USER_PRIORITY_LEVELS};
use std::collections::VecDeque;

/// One FIFO queue per user priority level.
///
/// Used for ready lists, mutex waiters and memory waiters alike. Items
/// queued at `Priority::Idle` are ignored; the idle level never waits.
#[derive(Debug)]
pub struct PriorityQueues<T> {
    levels: [VecDeque<T>; USER_PRIORITY_LEVELS],
}

impl<T> Default for PriorityQueues<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueues<T> {
    pub fn new() -> Self {
        Self {
            levels: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    /// Append to the tail of `priority`'s queue. Returns false for the idle level.
    pub fn push(&mut self, priority: Priority, item: T) -> bool {
        match priority.user_index() {
            Some(index) => {
                self.levels[index].push_back(item);
                true
            }
            None => false,
        }
    }

    /// Pop the head of the highest non-empty level.
    pub fn pop_highest(&mut self) -> Option<(Priority, T)> {
        for priority in Priority::USER_LEVELS {
            if let Some(item) = self.level_mut(priority).pop_front() {
                return Some((priority, item));
            }
        }
        None
    }

    pub fn highest_priority(&self) -> Option<Priority> {
        Priority::USER_LEVELS
            .into_iter()
            .find(|&p| !self.level(p).is_empty())
    }

    /// Remove the first item matching `pred`, searching every level.
    pub fn remove_first(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        for level in self.levels.iter_mut() {
            if let Some(pos) = level.iter().position(&mut pred) {
                return level.remove(pos);
            }
        }
        None
    }

    /// Keep only the items for which `keep` returns true, visiting levels
    /// from highest to lowest and each level in FIFO order.
    pub fn retain_in_order(&mut self, mut keep: impl FnMut(Priority, &T) -> bool) {
        for priority in Priority::USER_LEVELS {
            self.level_mut(priority).retain(|item| keep(priority, item));
        }
    }

    /// Items from highest to lowest level, FIFO within a level
    pub fn iter(&self) -> impl Iterator<Item = (Priority, &T)> + '_ {
        Priority::USER_LEVELS
            .into_iter()
            .flat_map(move |p| self.level(p).iter().map(move |item| (p, item)))
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    fn level(&self, priority: Priority) -> &VecDeque<T> {
        // USER_LEVELS never contains Idle
        &self.levels[priority.user_index().unwrap_or(0)]
    }

    fn level_mut(&mut self, priority: Priority) -> &mut VecDeque<T> {
        &mut self.levels[priority.user_index().unwrap_or(0)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_highest_level_first_fifo_within() {
        let mut queues = PriorityQueues::new();
        queues.push(Priority::Low, "l1");
        queues.push(Priority::High, "h1");
        queues.push(Priority::Normal, "n1");
        queues.push(Priority::High, "h2");

        assert_eq!(queues.highest_priority(), Some(Priority::High));
        let order: Vec<_> = std::iter::from_fn(|| queues.pop_highest().map(|(_, x)| x)).collect();
        assert_eq!(order, ["h1", "h2", "n1", "l1"]);
        assert!(queues.is_empty());
    }

    #[test]
    fn idle_level_is_never_queued() {
        let mut queues = PriorityQueues::new();
        assert!(!queues.push(Priority::Idle, 1));
        assert_eq!(queues.len(), 0);
    }

    #[test]
    fn remove_and_retain() {
        let mut queues = PriorityQueues::new();
        for (p, x) in [(Priority::Normal, 1), (Priority::Normal, 2), (Priority::High, 3)] {
            queues.push(p, x);
        }
        assert_eq!(queues.remove_first(|&x| x == 2), Some(2));
        assert_eq!(queues.remove_first(|&x| x == 2), None);

        let mut visited = Vec::new();
        queues.retain_in_order(|p, &x| {
            visited.push((p, x));
            x != 3
        });
        assert_eq!(visited, [(Priority::High, 3), (Priority::Normal, 1)]);
        assert_eq!(queues.iter().map(|(_, &x)| x).collect::<Vec<_>>(), [1]);
    }
}

use std::collections::VecDeque;

use crate::models::RebalanceAction;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded audit log of executed actions. Oldest entries are evicted first.
#[derive(Debug)]
pub struct ActionHistory {
    entries: VecDeque<RebalanceAction>,
    capacity: usize,
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ActionHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, action: RebalanceAction) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(action);
    }

    pub fn extend(&mut self, actions: impl IntoIterator<Item = RebalanceAction>) {
        for action in actions {
            self.push(action);
        }
    }

    /// Up to `limit` most recent entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<RebalanceAction> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionType;

    fn action(amount: f64) -> RebalanceAction {
        RebalanceAction::new(ActionType::Repay, "USDT", amount)
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut history = ActionHistory::with_capacity(3);
        for i in 0..10 {
            history.push(action(i as f64));
            assert!(history.len() <= 3);
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut history = ActionHistory::with_capacity(3);
        history.extend((1..=5).map(|i| action(i as f64)));

        let amounts: Vec<f64> = history.recent(10).iter().map(|a| a.amount).collect();
        assert_eq!(amounts, vec![3.0, 4.0, 5.0]);

        let amounts: Vec<f64> = history.recent(2).iter().map(|a| a.amount).collect();
        assert_eq!(amounts, vec![4.0, 5.0]);
    }

    #[test]
    fn test_default_capacity() {
        let history = ActionHistory::default();
        assert_eq!(history.capacity(), 100);
        assert!(history.is_empty());
    }
}

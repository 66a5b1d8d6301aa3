use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 60;

/// Fixed-capacity FIFO. Pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct History<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(item);
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &T> + '_ {
        self.buffer.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_below_capacity() {
        let mut history = History::new(3);
        assert!(history.is_empty());

        history.push(1);
        history.push(2);

        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(history.latest(), Some(&2));
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = History::new(3);
        for i in 1..=5 {
            history.push(i);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn default_capacity_holds_last_sixty() {
        let mut history = History::default();
        for i in 0..250 {
            history.push(i);
            assert!(history.len() <= HISTORY_CAPACITY);
        }

        let kept: Vec<_> = history.iter().copied().collect();
        assert_eq!(kept, (190..250).collect::<Vec<_>>());
    }

    #[test]
    fn zero_capacity_stays_empty() {
        let mut history = History::new(0);
        history.push("x");
        assert!(history.is_empty());
    }
}

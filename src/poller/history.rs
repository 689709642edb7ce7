use std::collections::VecDeque;

use crate::models::SegmentationResult;

/// Newest-first, bounded result feed.
#[derive(Debug, Clone)]
pub struct ResultHistory {
    entries: VecDeque<SegmentationResult>,
    capacity: usize,
}

impl ResultHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts at the head, then drops whatever falls past the cap.
    pub fn push(&mut self, result: SegmentationResult) {
        self.entries.push_front(result);
        self.entries.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentationResult> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<SegmentationResult> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f32) -> SegmentationResult {
        SegmentationResult::new(Some(format!("https://x/{score}.png")), Some(score), None)
    }

    #[test]
    fn newest_first() {
        let mut history = ResultHistory::new(5);
        history.push(result(0.1));
        history.push(result(0.2));
        history.push(result(0.3));

        let scores: Vec<_> = history.iter().map(|r| r.score().unwrap()).collect();
        assert_eq!(scores, vec![0.3, 0.2, 0.1]);
        assert_eq!(history.iter().next().and_then(|r| r.score()), Some(0.3));
    }

    #[test]
    fn fifty_first_insert_evicts_the_oldest() {
        let mut history = ResultHistory::new(50);
        let first = result(0.0);
        let first_id = first.id();
        history.push(first);
        for i in 1..50 {
            history.push(result(i as f32));
        }
        assert_eq!(history.len(), 50);
        assert!(history.iter().any(|r| r.id() == first_id));

        let latest = result(50.0);
        let latest_id = latest.id();
        history.push(latest);

        assert_eq!(history.len(), 50);
        assert_eq!(history.iter().next().map(|r| r.id()), Some(latest_id));
        assert!(!history.iter().any(|r| r.id() == first_id));
    }

    #[test]
    fn clear_empties_everything() {
        let mut history = ResultHistory::new(3);
        history.push(result(1.0));
        history.clear();
        assert!(history.is_empty());
        assert!(history.iter().next().is_none());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut history = ResultHistory::new(0);
        history.push(result(1.0));
        history.push(result(2.0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.iter().next().and_then(|r| r.score()), Some(2.0));
    }
}

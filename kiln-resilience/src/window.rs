//! Sliding window admission with priority-aware eviction: once the window is
//! full, an incoming request can still be admitted by evicting the lowest
//! priority record currently in the window, provided the incoming request
//! outranks it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Record {
    at: Instant,
    priority: u8,
}

pub struct SlidingWindow {
    window: Duration,
    limit: usize,
    records: Mutex<VecDeque<Record>>,
}

impl SlidingWindow {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self { window, limit, records: Mutex::new(VecDeque::with_capacity(limit)) }
    }

    fn expire(&self, records: &mut VecDeque<Record>, now: Instant) {
        while let Some(front) = records.front() {
            if now.duration_since(front.at) > self.window {
                records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Try to admit a request carrying `priority` (higher admits over lower
    /// when the window is full). Returns true if admitted.
    pub fn admit(&self, priority: u8) -> bool {
        let now = Instant::now();
        let mut records = self.records.lock().expect("sliding window poisoned");
        self.expire(&mut records, now);

        if records.len() < self.limit {
            records.push_back(Record { at: now, priority });
            return true;
        }

        let victim = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.priority < priority)
            .min_by_key(|(_, r)| r.priority)
            .map(|(i, _)| i);

        match victim {
            Some(i) => {
                records.remove(i);
                records.push_back(Record { at: now, priority });
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        let mut records = self.records.lock().expect("sliding window poisoned");
        self.expire(&mut records, Instant::now());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn admits_up_to_the_limit_then_denies_equal_priority() {
        let window = SlidingWindow::new(Duration::from_secs(60), 3);
        assert!(window.admit(5));
        assert!(window.admit(5));
        assert!(window.admit(5));
        assert!(!window.admit(5));
    }

    #[test]
    fn higher_priority_evicts_the_lowest_priority_record() {
        let window = SlidingWindow::new(Duration::from_secs(60), 2);
        assert!(window.admit(1));
        assert!(window.admit(2));
        assert!(window.admit(9));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn equal_or_lower_priority_cannot_evict() {
        let window = SlidingWindow::new(Duration::from_secs(60), 1);
        assert!(window.admit(5));
        assert!(!window.admit(5));
        assert!(!window.admit(1));
        assert!(window.admit(6));
    }

    #[test]
    fn expired_records_free_up_capacity() {
        let window = SlidingWindow::new(Duration::from_millis(20), 1);
        assert!(window.admit(5));
        thread::sleep(Duration::from_millis(40));
        assert!(window.admit(5));
    }
}

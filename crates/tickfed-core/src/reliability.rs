use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Rolling success ratio over the last `capacity` completed calls.
#[derive(Debug)]
pub struct ReliabilityWindow {
    capacity: usize,
    outcomes: Mutex<VecDeque<bool>>,
}

impl ReliabilityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            outcomes: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<bool>> {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, success: bool) {
        let mut outcomes = self.lock();
        if outcomes.len() == self.capacity {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    /// Success ratio in [0, 1]; 1.0 until the first call completes.
    pub fn weight(&self) -> f64 {
        let outcomes = self.lock();
        if outcomes.is_empty() {
            return 1.0;
        }
        let successes = outcomes.iter().filter(|success| **success).count();
        successes as f64 / outcomes.len() as f64
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

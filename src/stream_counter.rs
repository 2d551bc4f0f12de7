use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// Holds the open-streams gauge up by one until dropped
pub struct StreamCounter {
    counter: Arc<AtomicU64>,
}

impl StreamCounter {
    pub fn new(counter: Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);

        StreamCounter { counter }
    }
}

impl Drop for StreamCounter {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

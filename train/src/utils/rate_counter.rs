use crate::common::*;

/// Batch and box throughput over a reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub batches_per_sec: f64,
    pub boxes_per_sec: f64,
}

/// Counts processed batches and boxes, reporting their rates once per window.
#[derive(Debug)]
pub struct RateCounter {
    num_batches: usize,
    num_boxes: usize,
    since: Instant,
    window: Duration,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            num_batches: 0,
            num_boxes: 0,
            since: Instant::now(),
            window,
        }
    }

    pub fn with_second_interval() -> Self {
        Self::new(Duration::from_secs(1))
    }

    pub fn add_batch(&mut self, num_boxes: usize) {
        self.num_batches += 1;
        self.num_boxes += num_boxes;
    }

    /// Returns the rates once the window has passed, and starts a new window.
    pub fn throughput(&mut self) -> Option<Throughput> {
        let elapsed = self.since.elapsed();
        if elapsed < self.window {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let throughput = Throughput {
            batches_per_sec: self.num_batches as f64 / secs,
            boxes_per_sec: self.num_boxes as f64 / secs,
        };
        self.num_batches = 0;
        self.num_boxes = 0;
        self.since = Instant::now();
        Some(throughput)
    }
}

use std::time::Instant;

/// Records the cumulative time spent lowering a function and its nested
/// subgraphs.
pub struct Timer {
    start: Option<Instant>,
    elapsed_us: u64,
}

impl Timer {
    /// Create a new, inactive timer with zero elapsed time
    pub fn new() -> Timer {
        Timer {
            start: None,
            elapsed_us: 0,
        }
    }

    /// Start the timer, or reset the start point if already active
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stop the active timer and add the time since `start` to the total
    pub fn end(&mut self) {
        if let Some(start) = self.start.take() {
            self.elapsed_us += start.elapsed().as_micros() as u64;
        }
    }

    /// Return the cumulative elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f32 {
        (self.elapsed_us as f32) / 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Timer;

    #[test]
    fn test_timer() {
        let mut timer = Timer::new();
        assert_eq!(timer.elapsed_ms(), 0.);

        // `end` without `start` is a no-op.
        timer.end();
        assert_eq!(timer.elapsed_ms(), 0.);

        timer.start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        timer.end();
        let first = timer.elapsed_ms();
        assert!(first >= 2.);

        // Elapsed time accumulates across intervals.
        timer.start();
        std::thread::sleep(std::time::Duration::from_millis(1));
        timer.end();
        assert!(timer.elapsed_ms() >= first + 1.);
    }
}

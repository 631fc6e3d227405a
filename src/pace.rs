use std::thread;
use std::time::{Duration, Instant};

/// Sleep-based pacing to a fixed emission interval.
///
/// Each `wait` sleeps until the next scheduled emission. A caller that falls behind
/// is rescheduled from now instead of bursting to catch up.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_at: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_at: None,
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(fps_interval(fps))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next emission slot. The first call returns immediately.
    pub fn wait(&mut self) {
        let now = Instant::now();
        let scheduled = self.next_at.unwrap_or(now);
        if scheduled > now {
            thread::sleep(scheduled - now);
        }
        let emitted = scheduled.max(now);
        self.next_at = Some(emitted + self.interval);
    }
}

/// Minimum spacing between frames for `fps`. Zero disables pacing.
pub fn fps_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / fps).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wait_is_immediate() {
        let mut pacer = Pacer::new(Duration::from_secs(10));
        let started = Instant::now();
        pacer.wait();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn waits_space_emissions_by_interval() {
        let mut pacer = Pacer::new(Duration::from_millis(20));
        let started = Instant::now();
        for _ in 0..4 {
            pacer.wait();
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn late_caller_does_not_burst() {
        let mut pacer = Pacer::new(Duration::from_millis(30));
        pacer.wait();
        thread::sleep(Duration::from_millis(100));
        pacer.wait();
        let started = Instant::now();
        pacer.wait();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn fps_interval_handles_zero_and_high_rates() {
        assert_eq!(fps_interval(0), Duration::ZERO);
        assert_eq!(fps_interval(10), Duration::from_millis(100));
        assert_eq!(fps_interval(5000), Duration::from_millis(1));
    }
}

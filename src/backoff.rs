use std::thread;
use std::time::{Duration, Instant};

/// One step of the back-off schedule: a delay, repeated for `attempts`
/// waits before moving to the next band (`None` = stay forever).
#[derive(Clone, Copy, Debug)]
pub struct BackoffBand {
    pub delay: Duration,
    pub attempts: Option<u32>,
}

const DEFAULT_BANDS: [BackoffBand; 3] = [
    BackoffBand {
        delay: Duration::from_millis(250),
        attempts: Some(20),
    },
    BackoffBand {
        delay: Duration::from_millis(2000),
        attempts: Some(60),
    },
    BackoffBand {
        delay: Duration::from_millis(5000),
        attempts: None,
    },
];

const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Banded back-off pacing for repeated failures of the same kind.
///
/// Consecutive waits escalate through the bands; once calls stop arriving
/// within the grace window of the previous wait's expiry, the next wait is
/// treated as a fresh failure sequence and starts over at the first band.
pub struct BackoffTimer {
    bands: Vec<BackoffBand>,
    grace: Duration,
    band: usize,
    attempts_in_band: u32,
    last_expiry: Option<Instant>,
}

impl BackoffTimer {
    pub fn new() -> Self {
        Self::with_bands(DEFAULT_BANDS.to_vec(), DEFAULT_GRACE)
    }

    pub fn with_bands(bands: Vec<BackoffBand>, grace: Duration) -> Self {
        assert!(!bands.is_empty(), "back-off schedule needs at least one band");
        Self {
            bands,
            grace,
            band: 0,
            attempts_in_band: 0,
            last_expiry: None,
        }
    }

    /// Zero-based index of the band the next wait will use.
    pub fn band(&self) -> usize {
        self.band
    }

    /// State transition without the sleep: decides the delay for a wait
    /// issued at `now` and records the expected expiry.
    pub fn advance(&mut self, now: Instant) -> Duration {
        if let Some(expiry) = self.last_expiry {
            // Saturates to zero when `now` lands inside the previous wait.
            if now.duration_since(expiry) > self.grace {
                self.band = 0;
                self.attempts_in_band = 0;
            }
        }

        let delay = self.bands[self.band].delay;
        self.attempts_in_band += 1;
        if let Some(max) = self.bands[self.band].attempts {
            if self.attempts_in_band >= max && self.band + 1 < self.bands.len() {
                self.band += 1;
                self.attempts_in_band = 0;
            }
        }
        self.last_expiry = Some(now + delay);
        delay
    }

    /// Blocks the calling thread for the current band's delay.
    pub fn wait(&mut self) {
        let delay = self.advance(Instant::now());
        thread::sleep(delay);
    }
}

impl Default for BackoffTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives `advance` with synthetic timestamps spaced exactly one delay
    /// apart, i.e. the caller re-fails immediately after every wake-up.
    fn drive(timer: &mut BackoffTimer, waits: usize) -> Vec<Duration> {
        let mut now = Instant::now();
        let mut delays = Vec::with_capacity(waits);
        for _ in 0..waits {
            let delay = timer.advance(now);
            now += delay;
            delays.push(delay);
        }
        delays
    }

    #[test]
    fn bands_escalate_at_documented_boundaries() {
        let mut timer = BackoffTimer::new();
        let delays = drive(&mut timer, 85);

        assert!(delays[..20].iter().all(|d| *d == Duration::from_millis(250)));
        assert!(delays[20..80].iter().all(|d| *d == Duration::from_millis(2000)));
        assert!(delays[80..].iter().all(|d| *d == Duration::from_millis(5000)));
    }

    #[test]
    fn band_is_monotonic_within_a_sequence() {
        let mut timer = BackoffTimer::new();
        let mut now = Instant::now();
        let mut previous = timer.band();
        for _ in 0..100 {
            let delay = timer.advance(now);
            now += delay;
            assert!(timer.band() >= previous);
            previous = timer.band();
        }
    }

    #[test]
    fn gap_longer_than_grace_resets_to_first_band() {
        let mut timer = BackoffTimer::new();
        let mut now = Instant::now();
        for _ in 0..30 {
            now += timer.advance(now);
        }
        assert_eq!(timer.band(), 1);

        now += DEFAULT_GRACE + Duration::from_millis(1);
        let delay = timer.advance(now);
        assert_eq!(delay, Duration::from_millis(250));
        assert_eq!(timer.band(), 0);
    }

    #[test]
    fn retry_inside_grace_keeps_the_sequence() {
        let mut timer = BackoffTimer::new();
        let mut now = Instant::now();
        for _ in 0..25 {
            now += timer.advance(now);
            now += Duration::from_millis(1500); // below grace
        }
        assert_eq!(timer.band(), 1);
    }

    #[test]
    fn custom_single_band_never_escalates() {
        let bands = vec![BackoffBand {
            delay: Duration::from_millis(10),
            attempts: None,
        }];
        let mut timer = BackoffTimer::with_bands(bands, Duration::from_millis(50));
        let delays = drive(&mut timer, 10);
        assert!(delays.iter().all(|d| *d == Duration::from_millis(10)));
        assert_eq!(timer.band(), 0);
    }
}

/// Converts between sample indices and session-relative seconds.
///
/// Every component that reasons about audio time (window offsets, mute
/// intervals, finalized duration) goes through the same clock so that a
/// sample index always maps to exactly one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds of `samples` mono samples.
    pub fn seconds_for(&self, samples: usize) -> f64 {
        samples as f64 / self.sample_rate as f64
    }

    /// Number of samples covering `seconds`, rounded to the nearest sample.
    /// Negative durations clamp to zero.
    pub fn samples_for(&self, seconds: f64) -> usize {
        if seconds <= 0.0 {
            return 0;
        }
        (seconds * self.sample_rate as f64).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_for_samples() {
        let clock = SampleClock::new(16000);
        assert_eq!(clock.seconds_for(16000), 1.0);
        assert_eq!(clock.seconds_for(8000), 0.5);
        assert_eq!(clock.seconds_for(0), 0.0);
    }

    #[test]
    fn test_samples_for_seconds() {
        let clock = SampleClock::new(16000);
        assert_eq!(clock.samples_for(2.0), 32000);
        assert_eq!(clock.samples_for(0.5), 8000);
        assert_eq!(clock.samples_for(-1.0), 0);
    }

    #[test]
    fn test_round_trip_is_exact_at_sample_boundaries() {
        let clock = SampleClock::new(44100);
        for samples in [0usize, 1, 441, 44100, 88200] {
            assert_eq!(clock.samples_for(clock.seconds_for(samples)), samples);
        }
    }
}

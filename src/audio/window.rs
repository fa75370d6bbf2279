use tracing::warn;

use super::clock::SampleClock;
use super::source::AudioFrame;

/// A contiguous slice of audio handed to an annotator, tagged with its
/// absolute position on the session timeline. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Absolute session time of the first sample
    pub start_time_seconds: f64,
    pub duration_seconds: f64,
}

/// Buffers fanned-out frames until a configurable duration is reached, then
/// emits a window tagged with its absolute start time.
///
/// With `overlap_seconds > 0` the trailing overlap is retained after each
/// emission (sliding-window semantics) and the session offset advances by
/// `accumulate - overlap` per window, so the k-th window starts at
/// `k * (accumulate - overlap)`.
pub struct WindowAccumulator {
    clock: SampleClock,
    accumulate_samples: usize,
    step_samples: usize,
    buffer: Vec<i16>,
    offset_seconds: f64,
}

impl WindowAccumulator {
    pub fn new(clock: SampleClock, accumulation_seconds: f64, overlap_seconds: f64) -> Self {
        let accumulate_samples = clock.samples_for(accumulation_seconds).max(1);
        let mut overlap_samples = clock.samples_for(overlap_seconds);
        if overlap_samples >= accumulate_samples {
            warn!(
                "Window overlap {:.2}s >= accumulation {:.2}s, disabling overlap",
                overlap_seconds, accumulation_seconds
            );
            overlap_samples = 0;
        }

        Self {
            clock,
            accumulate_samples,
            step_samples: accumulate_samples - overlap_samples,
            buffer: Vec::new(),
            offset_seconds: 0.0,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        self.buffer.extend_from_slice(&frame.samples);
    }

    /// Emit the next window if enough audio has accumulated.
    ///
    /// Emission advances the session offset by one step; call [`rollback`]
    /// if the window's annotation fails so the timeline stays consistent.
    ///
    /// [`rollback`]: WindowAccumulator::rollback
    pub fn try_take_window(&mut self) -> Option<AudioWindow> {
        if self.buffer.len() < self.accumulate_samples {
            return None;
        }

        let samples = self.buffer[..self.accumulate_samples].to_vec();
        let window = AudioWindow {
            sample_rate: self.clock.sample_rate(),
            start_time_seconds: self.offset_seconds,
            duration_seconds: self.clock.seconds_for(self.accumulate_samples),
            samples,
        };

        // Keep the trailing overlap for the next window.
        self.buffer.drain(..self.step_samples);
        self.offset_seconds += self.clock.seconds_for(self.step_samples);

        Some(window)
    }

    /// Undo the offset advance of the most recent emission.
    ///
    /// After a failed annotate call the next window's timestamp must be
    /// computed as if the failed window never happened; without this a
    /// transient failure would skew every later timestamp.
    pub fn rollback(&mut self) {
        let step = self.clock.seconds_for(self.step_samples);
        self.offset_seconds = (self.offset_seconds - step).max(0.0);
    }

    /// Discard buffered audio and reset the session offset.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.offset_seconds = 0.0;
    }

    /// Samples currently buffered but not yet emitted.
    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use super::source::AudioFrame;

const METER_POLL: Duration = Duration::from_millis(200);

/// Compute the RMS level of a frame, normalized to [0.0, 1.0].
pub fn frame_rms(frame: &AudioFrame) -> f64 {
    if frame.samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = frame
        .samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    (sum_squares / frame.samples.len() as f64).sqrt()
}

/// VU meter subscriber: consumes one fan-out channel and publishes the
/// latest RMS level on a watch channel for whoever renders it.
pub fn spawn_vu_meter(
    mut frames: mpsc::Receiver<AudioFrame>,
    stop_flag: Arc<AtomicBool>,
) -> (watch::Receiver<f64>, JoinHandle<()>) {
    let (level_tx, level_rx) = watch::channel(0.0);

    let task = tokio::spawn(async move {
        loop {
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            match timeout(METER_POLL, frames.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(frame)) => {
                    let rms = frame_rms(&frame);
                    // Receivers may all be gone; the meter is best-effort.
                    let _ = level_tx.send(rms);
                }
            }
        }
        debug!("VU meter task stopped");
    });

    (level_rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence_is_zero() {
        let frame = AudioFrame {
            samples: vec![0; 1600],
            sample_rate: 16000,
            sequence: 0,
        };
        assert_eq!(frame_rms(&frame), 0.0);
    }

    #[test]
    fn test_rms_of_full_scale_is_one() {
        let frame = AudioFrame {
            samples: vec![i16::MAX; 1600],
            sample_rate: 16000,
            sequence: 0,
        };
        assert!((frame_rms(&frame) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rms_of_empty_frame_is_zero() {
        let frame = AudioFrame {
            samples: vec![],
            sample_rate: 16000,
            sequence: 0,
        };
        assert_eq!(frame_rms(&frame), 0.0);
    }
}

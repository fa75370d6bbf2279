use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use super::clock::SampleClock;

/// How often the capture task re-checks the stop flag while waiting on the device.
const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// Errors raised by audio devices and the capture fan-out.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open audio device: {0}")]
    OpenFailed(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("capture is already running")]
    AlreadyCapturing,
    #[error("capture is not running")]
    NotCapturing,
    #[error("subscribers must attach before capture starts")]
    SubscribeAfterStart,
}

/// A block of mono PCM samples as delivered by the capture device.
///
/// Frames are owned by the capture task until copied into subscriber
/// channels; every subscriber gets its own independent copy.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Monotonically increasing frame index, assigned at capture
    pub sequence: u64,
}

/// Audio capture device seam.
///
/// Real input devices (microphones) live outside the core behind this
/// trait; the in-tree [`SyntheticDevice`] drives tests and the demo binary.
#[async_trait]
pub trait AudioDevice: Send {
    /// Start producing frames.
    ///
    /// The channel carries `Err` for a mid-stream device failure; closing
    /// the channel without an error is a normal end of input.
    async fn start(&mut self) -> Result<mpsc::Receiver<Result<AudioFrame, DeviceError>>, DeviceError>;

    /// Stop producing frames and release the device.
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Deterministic tone generator used by tests and the demo binary.
///
/// Emits `total_frames` frames of `frame_samples` samples each, then closes
/// its channel.
pub struct SyntheticDevice {
    sample_rate: u32,
    frame_samples: usize,
    total_frames: usize,
    amplitude: i16,
    running: Arc<AtomicBool>,
}

impl SyntheticDevice {
    pub fn new(sample_rate: u32, frame_samples: usize, total_frames: usize) -> Self {
        Self {
            sample_rate,
            frame_samples,
            total_frames,
            amplitude: 0,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit a constant non-zero sample value instead of silence.
    pub fn with_amplitude(mut self, amplitude: i16) -> Self {
        self.amplitude = amplitude;
        self
    }
}

#[async_trait]
impl AudioDevice for SyntheticDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<Result<AudioFrame, DeviceError>>, DeviceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyCapturing);
        }

        let (tx, rx) = mpsc::channel(64);
        let sample_rate = self.sample_rate;
        let frame_samples = self.frame_samples;
        let total_frames = self.total_frames;
        let amplitude = self.amplitude;
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            for sequence in 0..total_frames as u64 {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let frame = AudioFrame {
                    samples: vec![amplitude; frame_samples],
                    sample_rate,
                    sequence,
                };
                if tx.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// The full capture result handed back when the source stops.
#[derive(Debug, Clone)]
pub struct FinalizedAudio {
    /// Concatenated PCM of everything that was captured
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Actual elapsed audio duration
    pub duration_seconds: f64,
    /// True when capture ended because of a mid-stream device error
    pub degraded: bool,
}

/// Owns the capture device and fans every frame out to N subscriber
/// channels plus the rawframe accumulation buffer.
///
/// Subscriber channels are bounded with a generous cap; a full channel
/// drops that subscriber's copy of the frame with a "subscriber overloaded"
/// warning rather than ever blocking capture.
pub struct AudioSource {
    clock: SampleClock,
    subscriber_capacity: usize,
    subscribers: Vec<(&'static str, mpsc::Sender<AudioFrame>)>,
    stop_flag: Arc<AtomicBool>,
    capture_task: Option<JoinHandle<FinalizedAudio>>,
}

impl AudioSource {
    pub fn new(sample_rate: u32, subscriber_capacity: usize) -> Self {
        Self {
            clock: SampleClock::new(sample_rate),
            subscriber_capacity,
            subscribers: Vec::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            capture_task: None,
        }
    }

    pub fn clock(&self) -> SampleClock {
        self.clock
    }

    /// Attach a subscriber channel. Must be called before `start`.
    pub fn subscribe(&mut self, name: &'static str) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if self.capture_task.is_some() {
            return Err(DeviceError::SubscribeAfterStart);
        }
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.subscribers.push((name, tx));
        Ok(rx)
    }

    /// Open the device and start the capture task.
    pub async fn start(&mut self, mut device: Box<dyn AudioDevice>) -> Result<(), DeviceError> {
        if self.capture_task.is_some() {
            return Err(DeviceError::AlreadyCapturing);
        }

        info!("Starting audio capture on device '{}'", device.name());
        let mut device_rx = device.start().await?;

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        let subscribers = std::mem::take(&mut self.subscribers);
        let clock = self.clock;

        let task = tokio::spawn(async move {
            let mut buffer: Vec<i16> = Vec::new();
            let mut sequence: u64 = 0;
            let mut degraded = false;

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                match timeout(CAPTURE_POLL, device_rx.recv()).await {
                    Err(_) => continue, // poll timeout, re-check stop flag
                    Ok(None) => break,  // device closed its channel (end of input)
                    Ok(Some(Err(e))) => {
                        warn!("Device error mid-stream, finalizing partial session: {}", e);
                        degraded = true;
                        break;
                    }
                    Ok(Some(Ok(mut frame))) => {
                        frame.sequence = sequence;
                        sequence += 1;

                        // Raw buffer first: the save path must never lose a frame.
                        buffer.extend_from_slice(&frame.samples);

                        for (name, tx) in &subscribers {
                            match tx.try_send(frame.clone()) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    warn!(
                                        "Subscriber '{}' overloaded, dropping frame {}",
                                        name, frame.sequence
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {}
                            }
                        }
                    }
                }
            }

            if let Err(e) = device.stop().await {
                warn!("Failed to stop audio device: {}", e);
            }

            let duration_seconds = clock.seconds_for(buffer.len());
            info!(
                "Capture finished: {} frames, {:.2}s{}",
                sequence,
                duration_seconds,
                if degraded { " (degraded)" } else { "" }
            );

            FinalizedAudio {
                samples: buffer,
                sample_rate: clock.sample_rate(),
                duration_seconds,
                degraded,
            }
        });

        self.capture_task = Some(task);
        Ok(())
    }

    /// Stop capture and return the full concatenated PCM buffer.
    pub async fn stop(&mut self) -> Result<FinalizedAudio, DeviceError> {
        let task = self.capture_task.take().ok_or(DeviceError::NotCapturing)?;
        self.stop_flag.store(true, Ordering::SeqCst);

        task.await
            .map_err(|e| DeviceError::Stream(format!("capture task panicked: {}", e)))
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_task.is_some()
    }

    /// True when the capture task ended on its own (device closed its
    /// channel or failed mid-stream) and `stop` has not collected it yet.
    pub fn capture_finished(&self) -> bool {
        self.capture_task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(false)
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::AnnotateError;
use crate::audio::{AudioFrame, AudioWindow, WindowAccumulator};

/// Poll interval on the input channel; bounds how long a consumer can take
/// to observe a stop request.
pub const CONSUMER_POLL: Duration = Duration::from_millis(200);

/// Generic annotation consumer loop: one per transcription, diarization and
/// emotion.
///
/// Pulls fanned-out frames, accumulates them into windows and runs the
/// annotate call entirely within this task, so a slow annotator never
/// stalls capture or the other consumers. A failed window is logged and
/// rolled back; it never terminates the consumer. On stop, any partially
/// accumulated window is discarded (accepted minor tail loss).
pub async fn run_consumer<R, F, Fut>(
    name: &'static str,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut accumulator: WindowAccumulator,
    results: mpsc::UnboundedSender<R>,
    stop_flag: Arc<AtomicBool>,
    annotate: F,
) where
    R: Send + 'static,
    F: Fn(AudioWindow) -> Fut,
    Fut: Future<Output = Result<Vec<R>, AnnotateError>>,
{
    info!("Annotation consumer '{}' started", name);

    'outer: loop {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        let frame = match timeout(CONSUMER_POLL, frames.recv()).await {
            Err(_) => continue, // poll timeout, re-check stop flag
            Ok(None) => break,  // capture ended and the channel drained
            Ok(Some(frame)) => frame,
        };

        accumulator.push(&frame);

        while let Some(window) = accumulator.try_take_window() {
            match annotate(window).await {
                Ok(items) => {
                    for item in items {
                        if results.send(item).is_err() {
                            warn!("Consumer '{}' result channel closed, stopping", name);
                            break 'outer;
                        }
                    }
                }
                Err(e) => {
                    // Skip the window but keep the timeline consistent.
                    warn!("Consumer '{}' annotation failed, skipping window: {}", name, e);
                    accumulator.rollback();
                }
            }
        }
    }

    if accumulator.pending_samples() > 0 {
        debug!(
            "Consumer '{}' discarding {} buffered samples on stop",
            name,
            accumulator.pending_samples()
        );
    }

    info!("Annotation consumer '{}' stopped", name);
}

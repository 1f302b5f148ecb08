//! The stream processor: one worker thread that pulls frames from the video
//! source, annotates sampled frames and broadcasts them to subscribers.

pub mod message;
mod worker;

pub use message::StreamMessage;
pub use worker::FrameSampler;

use crate::registry::SubscriberRegistry;
use crate::source::SourceOpener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use vision::DetectorHandle;
use worker::Worker;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("AI stream processing already running")]
    AlreadyRunning,

    #[error("failed to spawn stream worker: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Process one out of every `sample_every` frames read.
    pub sample_every: u64,
    /// Pause after each processed frame.
    pub frame_interval: Duration,
    /// Pause after a failed read before trying again.
    pub read_backoff: Duration,
    pub jpeg_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            sample_every: 3,
            frame_interval: Duration::from_millis(33),
            read_backoff: Duration::from_millis(100),
            jpeg_quality: vision::codec::DEFAULT_JPEG_QUALITY,
        }
    }
}

pub struct StreamProcessor {
    opener: Arc<dyn SourceOpener>,
    detector: DetectorHandle,
    registry: Arc<SubscriberRegistry>,
    settings: StreamSettings,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamProcessor {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        detector: DetectorHandle,
        registry: Arc<SubscriberRegistry>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            opener,
            detector,
            registry,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker unless one is already running.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::AlreadyRunning);
        }

        // A worker that gave up on its own still owns a handle.
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }

        let worker = Worker {
            opener: Arc::clone(&self.opener),
            detector: self.detector.clone(),
            registry: Arc::clone(&self.registry),
            settings: self.settings.clone(),
            running: Arc::clone(&self.running),
        };

        match thread::Builder::new()
            .name("stream-worker".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                *slot = Some(handle);
                tracing::info!("AI stream processing started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(StreamError::Spawn(e))
            }
        }
    }

    /// Stops the worker, waits for it to release the source, then disconnects
    /// every subscriber. Blocks; call from a blocking context.
    pub fn stop(&self) {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        self.running.store(false, Ordering::Release);

        let Some(handle) = slot.take() else {
            return;
        };

        if handle.join().is_err() {
            tracing::error!("Stream worker panicked");
        }
        self.registry.clear();
        tracing::info!("AI stream processing stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn detector(&self) -> &DetectorHandle {
        &self.detector
    }
}

impl Drop for StreamProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("running", &self.is_running())
            .field("settings", &self.settings)
            .finish()
    }
}

#![allow(dead_code)]

use gateway::registry::SharedMessage;
use gateway::{PushError, SourceError, SourceOpener, Subscriber, VideoSource};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vision::{BoundingBox, Detection, Detector, Frame};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Bookkeeping shared between a [`SyntheticOpener`] and the sources it opens.
#[derive(Default)]
pub struct SourceStats {
    pub opens: AtomicUsize,
    pub open_handles: AtomicUsize,
    pub frames_read: AtomicUsize,
    pub exhausted: AtomicBool,
}

/// Yields `limit` solid frames (or forever), then read errors.
pub struct SyntheticOpener {
    pub stats: Arc<SourceStats>,
    limit: Option<usize>,
    fail_open: bool,
}

impl SyntheticOpener {
    pub fn endless() -> Self {
        Self {
            stats: Arc::default(),
            limit: None,
            fail_open: false,
        }
    }

    pub fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::endless()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Self::endless()
        }
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self) -> Result<Box<dyn VideoSource>, SourceError> {
        if self.fail_open {
            return Err(SourceError::Open(anyhow::anyhow!("connection refused")));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        self.stats.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            stats: self.stats.clone(),
            limit: self.limit,
            served: 0,
        }))
    }
}

struct SyntheticSource {
    stats: Arc<SourceStats>,
    limit: Option<usize>,
    served: usize,
}

impl VideoSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if self.limit.is_some_and(|limit| self.served >= limit) {
            self.stats.exhausted.store(true, Ordering::SeqCst);
            return Err(SourceError::Read(anyhow::anyhow!("end of synthetic stream")));
        }
        self.served += 1;
        self.stats.frames_read.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::from_pixel(WIDTH, HEIGHT, image::Rgb([40, 40, 40])))
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stats.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out exactly the frames pushed through the paired [`Sender`]; reads
/// fail while nothing is queued. Opens at most once.
pub struct SteppedOpener {
    frames: Mutex<Option<Receiver<Frame>>>,
}

impl SteppedOpener {
    pub fn new() -> (Self, Sender<Frame>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                frames: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl SourceOpener for SteppedOpener {
    fn open(&self) -> Result<Box<dyn VideoSource>, SourceError> {
        let frames = self
            .frames
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SourceError::Open(anyhow::anyhow!("stepped source already opened")))?;
        Ok(Box::new(SteppedSource { frames }))
    }
}

struct SteppedSource {
    frames: Receiver<Frame>,
}

impl VideoSource for SteppedSource {
    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        self.frames
            .recv_timeout(Duration::from_millis(10))
            .map_err(|e| SourceError::Read(anyhow::anyhow!("no frame queued: {e}")))
    }
}

pub fn white_frame() -> Frame {
    Frame::from_pixel(WIDTH, HEIGHT, image::Rgb([255, 255, 255]))
}

/// Returns a fixed set of detections and counts calls.
pub struct FixedDetector {
    pub detections: Vec<Detection>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: Arc::default(),
        }
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

pub fn detection(class: &str, confidence: f32) -> Detection {
    Detection::new(class, confidence, BoundingBox::new(4.0, 20.0, 30.0, 40.0))
}

/// Keeps every message it receives.
#[derive(Default)]
pub struct RecordingSubscriber {
    messages: Mutex<Vec<SharedMessage>>,
}

impl RecordingSubscriber {
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn parsed(&self) -> Vec<Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }
}

impl Subscriber for RecordingSubscriber {
    fn push(&self, message: SharedMessage) -> Result<(), PushError> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// Behaves like a client whose connection dropped.
#[derive(Default)]
pub struct FailingSubscriber {
    pub attempts: AtomicUsize,
}

impl Subscriber for FailingSubscriber {
    fn push(&self, _message: SharedMessage) -> Result<(), PushError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PushError::Closed)
    }
}

/// Polls `condition` until it holds or the timeout expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

use super::StreamSettings;
use super::message::{StreamMessage, unix_timestamp};
use crate::registry::{BroadcastReport, SubscriberRegistry};
use crate::source::SourceOpener;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::span_debug;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use vision::{DetectorHandle, DetectorState, Frame, StatusBanner, annotate_frame, encode_jpeg};

/// Admits one out of every `every` frames: the `every`-th, `2*every`-th, ...
#[derive(Debug, Clone)]
pub struct FrameSampler {
    every: u64,
    count: u64,
}

impl FrameSampler {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    pub fn admit(&mut self) -> bool {
        self.count += 1;
        self.count.is_multiple_of(self.every)
    }

    pub fn frames_seen(&self) -> u64 {
        self.count
    }
}

struct StreamMetrics {
    frames_read: Counter<u64>,
    frames_processed: Counter<u64>,
    frames_broadcast: Counter<u64>,
    subscribers_dropped: Counter<u64>,
    frame_duration: Histogram<f64>,
}

impl StreamMetrics {
    fn init(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0,
        ];

        Self {
            frames_read: meter
                .u64_counter("stream_frames_read_total")
                .with_description("Frames read from the video source")
                .build(),
            frames_processed: meter
                .u64_counter("stream_frames_processed_total")
                .with_description("Sampled frames run through detection")
                .build(),
            frames_broadcast: meter
                .u64_counter("stream_frames_broadcast_total")
                .with_description("Annotated frames broadcast to subscribers")
                .build(),
            subscribers_dropped: meter
                .u64_counter("stream_subscribers_dropped_total")
                .with_description("Subscribers dropped after a failed push")
                .build(),
            frame_duration: meter
                .f64_histogram("stream_frame_duration_seconds")
                .with_description("Time to detect, annotate, encode and broadcast one frame")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
        }
    }
}

struct FrameOutcome {
    objects: usize,
    broadcast: Option<BroadcastReport>,
}

pub(super) struct Worker {
    pub(super) opener: Arc<dyn SourceOpener>,
    pub(super) detector: DetectorHandle,
    pub(super) registry: Arc<SubscriberRegistry>,
    pub(super) settings: StreamSettings,
    pub(super) running: Arc<AtomicBool>,
}

impl Worker {
    pub(super) fn run(self) {
        let mut source = match self.opener.open() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "Video source unavailable, stream processing stopped");
                self.running.store(false, Ordering::Release);
                return;
            }
        };

        let metrics = StreamMetrics::init("gateway");
        let mut sampler = FrameSampler::new(self.settings.sample_every);
        let mut processed = 0u64;

        tracing::info!(
            sample_every = self.settings.sample_every,
            "Starting stream loop"
        );

        while self.running.load(Ordering::Acquire) {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "Frame read failed, retrying");
                    thread::sleep(self.settings.read_backoff);
                    continue;
                }
            };
            metrics.frames_read.add(1, &[]);

            if !sampler.admit() {
                continue;
            }

            let start = Instant::now();
            match self.process_frame(&frame) {
                Ok(outcome) => {
                    metrics.frames_processed.add(1, &[]);
                    metrics
                        .frame_duration
                        .record(start.elapsed().as_secs_f64(), &[]);
                    if let Some(report) = outcome.broadcast {
                        metrics.frames_broadcast.add(1, &[]);
                        if report.dropped > 0 {
                            metrics.subscribers_dropped.add(report.dropped as u64, &[]);
                        }
                    }

                    processed += 1;
                    if processed.is_multiple_of(30) {
                        tracing::debug!(
                            frames_read = sampler.frames_seen(),
                            frames_processed = processed,
                            objects = outcome.objects,
                            subscribers = self.registry.len(),
                            "Stream status"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "Skipping frame");
                }
            }

            thread::sleep(self.settings.frame_interval);
        }

        drop(source);
        tracing::info!(frames_processed = processed, "Stream loop exited");
    }

    #[tracing::instrument(name = "process_frame", skip_all)]
    fn process_frame(&self, frame: &Frame) -> anyhow::Result<FrameOutcome> {
        let (detections, banner) = match self.detector.state() {
            DetectorState::Ready => {
                let detections = self.detector.detect(frame)?;
                let banner = StatusBanner::Active {
                    objects: detections.len(),
                };
                (detections, banner)
            }
            DetectorState::Loading => (Vec::new(), StatusBanner::Loading),
            DetectorState::Failed(_) => (Vec::new(), StatusBanner::Unavailable),
        };
        let objects = detections.len();

        if self.registry.is_empty() {
            return Ok(FrameOutcome {
                objects,
                broadcast: None,
            });
        }

        let jpeg = {
            let _s = span_debug!("annotate_encode");
            let annotated = annotate_frame(frame, &detections, Some(banner));
            encode_jpeg(&annotated, self.settings.jpeg_quality)?
        };

        let message = StreamMessage::Frame {
            data: BASE64.encode(&jpeg),
            timestamp: unix_timestamp(),
            status: banner.as_str(),
            objects,
        }
        .to_shared()?;

        let report = self.registry.broadcast(message);
        tracing::trace!(
            delivered = report.delivered,
            dropped = report.dropped,
            objects,
            "Frame broadcast"
        );

        Ok(FrameOutcome {
            objects,
            broadcast: Some(report),
        })
    }
}

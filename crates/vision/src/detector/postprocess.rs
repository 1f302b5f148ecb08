use super::preprocess::LetterboxTransform;
use crate::{BoundingBox, Detection, labels};
use ndarray::ArrayViewD;

/// YOLOv8 candidates below this never leave the backend.
pub const DEFAULT_SCORE_FLOOR: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

pub struct PostProcessor {
    pub score_floor: f32,
    pub iou_threshold: f32,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_FLOOR, DEFAULT_IOU_THRESHOLD)
    }
}

impl PostProcessor {
    pub fn new(score_floor: f32, iou_threshold: f32) -> Self {
        Self {
            score_floor,
            iou_threshold,
        }
    }

    /// Decodes a YOLOv8 head, `[1, 4 + classes, anchors]` (or its transpose),
    /// into frame-space detections after class-wise NMS.
    #[tracing::instrument(skip(self, output, transform))]
    pub fn parse_detections(
        &self,
        output: &ArrayViewD<f32>,
        transform: &LetterboxTransform,
    ) -> anyhow::Result<Vec<Detection>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 {
            anyhow::bail!("unexpected detector output shape {:?}", shape);
        }

        // Exports put the short axis (box + class scores) first; the anchor
        // axis is always the longer one.
        let channels_first = shape[1] <= shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };

        if channels < 5 {
            anyhow::bail!("detector output has {} channels, need at least 5", channels);
        }

        let at = |channel: usize, anchor: usize| -> f32 {
            if channels_first {
                output[[0, channel, anchor]]
            } else {
                output[[0, anchor, channel]]
            }
        };

        let mut candidates = Vec::new();

        for anchor in 0..anchors {
            let mut best_score = f32::NEG_INFINITY;
            let mut best_class = 0usize;
            for class in 0..channels - 4 {
                let score = at(4 + class, anchor);
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }

            if best_score < self.score_floor {
                continue;
            }

            let input_box =
                BoundingBox::from_cxcywh(at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            let bbox = transform.to_frame(input_box);
            if !bbox.is_valid() {
                continue;
            }

            candidates.push(Detection::new(
                labels::class_name(best_class),
                best_score,
                bbox,
            ));
        }

        tracing::trace!(candidates = candidates.len(), "Decoded detector output");

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Greedy class-wise NMS. Output is ordered by descending confidence.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_label == candidate.class_label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

//! Burns detections and the stream status banner into a copy of a frame.

pub mod font;

use crate::{Detection, Frame};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;
const LABEL_PADDING: u32 = 4;

const BANNER_ORIGIN: (i32, i32) = (10, 10);
const BANNER_HEIGHT: u32 = 40;
const BANNER_PADDING: u32 = 10;
const BANNER_SCALE: u32 = 2;

/// Fixed-position status overlay shown on streamed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBanner {
    Active { objects: usize },
    Loading,
    /// The model failed to load; frames pass through undetected.
    Unavailable,
}

impl StatusBanner {
    pub fn text(&self) -> String {
        match self {
            StatusBanner::Active { objects } => format!("AI ACTIVE | OBJECTS: {objects}"),
            StatusBanner::Loading => "AI LOADING...".to_string(),
            StatusBanner::Unavailable => "AI UNAVAILABLE".to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusBanner::Active { .. } => "active",
            StatusBanner::Loading => "loading",
            StatusBanner::Unavailable => "unavailable",
        }
    }

    /// (fill, text)
    fn colors(&self) -> (Rgb<u8>, Rgb<u8>) {
        match self {
            StatusBanner::Active { .. } => (Rgb([0, 0, 0]), Rgb([0, 255, 0])),
            StatusBanner::Loading => (Rgb([255, 0, 0]), Rgb([255, 255, 255])),
            StatusBanner::Unavailable => (Rgb([128, 128, 128]), Rgb([255, 255, 255])),
        }
    }
}

/// Returns an annotated copy of `frame`; the input is never modified.
pub fn annotate_frame(frame: &Frame, detections: &[Detection], banner: Option<StatusBanner>) -> Frame {
    let mut out = frame.clone();

    for detection in detections {
        draw_detection(&mut out, detection);
    }

    if let Some(banner) = banner {
        draw_banner(&mut out, &banner);
    }

    out
}

fn draw_detection(image: &mut Frame, detection: &Detection) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let bbox = detection
        .bbox
        .clamp_to(width.saturating_sub(1), height.saturating_sub(1));
    let x1 = bbox.x1.round() as i32;
    let y1 = bbox.y1.round() as i32;
    let box_w = (bbox.x2.round() as i32 - x1 + 1).max(1) as u32;
    let box_h = (bbox.y2.round() as i32 - y1 + 1).max(1) as u32;

    for t in 0..BOX_THICKNESS {
        if box_w <= 2 * t || box_h <= 2 * t {
            break;
        }
        let rect = Rect::at(x1 + t as i32, y1 + t as i32).of_size(box_w - 2 * t, box_h - 2 * t);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }

    let label = detection.label();
    let patch = (
        font::text_width(&label, LABEL_SCALE) + 2 * LABEL_PADDING,
        font::text_height(LABEL_SCALE) + 2 * LABEL_PADDING,
    );
    let (px, py) = label_origin(x1, y1, patch, (width, height));

    draw_filled_rect_mut(image, Rect::at(px, py).of_size(patch.0, patch.1), BOX_COLOR);
    font::draw_text(
        image,
        px + LABEL_PADDING as i32,
        py + LABEL_PADDING as i32,
        &label,
        LABEL_SCALE,
        LABEL_TEXT_COLOR,
    );
}

/// Top-left corner of a label patch for a box whose top-left is `(x1, y1)`.
///
/// The patch sits just above the box. Boxes too close to the top edge get the
/// patch just below their top edge instead, and the patch never leaves the frame
/// horizontally.
pub(crate) fn label_origin(x1: i32, y1: i32, patch: (u32, u32), frame: (u32, u32)) -> (i32, i32) {
    let (patch_w, patch_h) = (patch.0 as i32, patch.1 as i32);
    let (frame_w, frame_h) = (frame.0 as i32, frame.1 as i32);

    let x = x1.min(frame_w - patch_w).max(0);
    let y = if y1 >= patch_h {
        y1 - patch_h
    } else {
        y1.min(frame_h - patch_h).max(0)
    };
    (x, y)
}

fn draw_banner(image: &mut Frame, banner: &StatusBanner) {
    let text = banner.text();
    let (fill, text_color) = banner.colors();
    let width = font::text_width(&text, BANNER_SCALE) + 2 * BANNER_PADDING;

    draw_filled_rect_mut(
        image,
        Rect::at(BANNER_ORIGIN.0, BANNER_ORIGIN.1).of_size(width, BANNER_HEIGHT),
        fill,
    );

    let text_y = BANNER_ORIGIN.1 + (BANNER_HEIGHT - font::text_height(BANNER_SCALE)) as i32 / 2;
    font::draw_text(
        image,
        BANNER_ORIGIN.0 + BANNER_PADDING as i32,
        text_y,
        &text,
        BANNER_SCALE,
        text_color,
    );
}

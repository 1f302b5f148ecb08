pub mod annotate;
pub mod codec;
pub mod detection;
pub mod detector;
pub mod labels;

pub use annotate::{StatusBanner, annotate_frame};
pub use codec::{CodecError, decode_image, encode_jpeg};
pub use detection::{BoundingBox, Detection};
pub use detector::{Detector, DetectorError, DetectorHandle, DetectorState};

/// One captured video frame, RGB8.
pub type Frame = image::RgbImage;

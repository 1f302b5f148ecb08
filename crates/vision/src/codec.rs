use crate::Frame;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty image payload")]
    Empty,

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),
}

/// Encodes a frame as baseline JPEG. Quality is clamped to `1..=100`.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::with_capacity(frame.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(frame)
        .map_err(CodecError::Encode)?;
    Ok(buffer)
}

/// Decodes any supported still-image format (JPEG, PNG) to RGB8.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    let image = image::load_from_memory(bytes).map_err(CodecError::Decode)?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn jpeg_output_decodes_to_same_dimensions() {
        let frame = Frame::from_pixel(64, 48, Rgb([200, 30, 30]));
        let jpeg = encode_jpeg(&frame, DEFAULT_JPEG_QUALITY).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "JPEG SOI marker");

        let decoded = decode_image(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
        let px = decoded.get_pixel(32, 24);
        assert!(px[0] > 150 && px[1] < 80, "color roughly preserved: {:?}", px);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(decode_image(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn png_is_accepted() {
        let frame = Frame::from_pixel(3, 2, Rgb([1, 2, 3]));
        let mut png = Vec::new();
        frame
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        assert_eq!(decode_image(&png).unwrap(), frame);
    }
}

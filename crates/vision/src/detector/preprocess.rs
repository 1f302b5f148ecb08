use crate::{BoundingBox, Frame};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{Array, IxDyn};

const LETTERBOX_COLOR: u8 = 114;

/// Maps model-input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl LetterboxTransform {
    /// Undo the letterbox and clamp to the frame.
    pub fn to_frame(&self, input_box: BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: (input_box.x1 - self.offset_x) / self.scale,
            y1: (input_box.y1 - self.offset_y) / self.scale,
            x2: (input_box.x2 - self.offset_x) / self.scale,
            y2: (input_box.y2 - self.offset_y) / self.scale,
        }
        .clamp_to(self.frame_width, self.frame_height)
    }
}

/// Letterboxes frames into the square model input and normalizes to `[0, 1]` NCHW.
pub struct Letterbox {
    input_size: u32,
    canvas: Vec<u8>,
    resizer: Resizer,
}

impl Letterbox {
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            canvas: vec![LETTERBOX_COLOR; (input_size * input_size * 3) as usize],
            resizer: Resizer::new(),
        }
    }

    pub fn prepare(&mut self, frame: &Frame) -> anyhow::Result<(Array<f32, IxDyn>, LetterboxTransform)> {
        let _s = span!("letterbox");

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("cannot preprocess an empty {}x{} frame", width, height);
        }

        let size = self.input_size;
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = ((width as f32 * scale) as u32).clamp(1, size);
        let new_height = ((height as f32 * scale) as u32).clamp(1, size);

        let offset_x = (size - new_width) / 2;
        let offset_y = (size - new_height) / 2;

        let src = ImageRef::new(width, height, frame.as_raw(), PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        self.resizer.resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.canvas.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let stride = (size * 3) as usize;
        let row_bytes = (new_width * 3) as usize;

        for y in 0..new_height as usize {
            let src_row = y * row_bytes;
            let dst_row = (y + offset_y as usize) * stride + offset_x as usize * 3;
            self.canvas[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        let tensor = normalize(&self.canvas, size as usize)?;

        Ok((
            tensor,
            LetterboxTransform {
                scale,
                offset_x: offset_x as f32,
                offset_y: offset_y as f32,
                frame_width: width,
                frame_height: height,
            },
        ))
    }
}

fn normalize(rgb: &[u8], size: usize) -> anyhow::Result<Array<f32, IxDyn>> {
    let spatial = size * size;
    let mut output = vec![0.0f32; 3 * spatial];

    for (i, px) in rgb.chunks_exact(3).enumerate() {
        output[i] = px[0] as f32 / 255.0;
        output[i + spatial] = px[1] as f32 / 255.0;
        output[i + 2 * spatial] = px[2] as f32 / 255.0;
    }

    Ok(Array::from_shape_vec(IxDyn(&[1, 3, size, size]), output)?)
}

//! Image to tensor conversion shared by training and inference

use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    image::load_from_memory(bytes).map_err(|e| PreprocessError::Decode(e.to_string()))
}

/// Center-crops and resizes to `height x width`, converts to `channels`
/// and returns `[channels, height, width]` values scaled to `[0, 1]`
pub fn to_chw(
    image: &DynamicImage,
    height: usize,
    width: usize,
    channels: usize,
) -> Result<Vec<f32>, PreprocessError> {
    let resized = image.resize_to_fill(width as u32, height as u32, FilterType::Triangle);
    let raw = match channels {
        1 => resized.to_luma8().into_raw(),
        3 => resized.to_rgb8().into_raw(),
        4 => resized.to_rgba8().into_raw(),
        other => return Err(PreprocessError::UnsupportedChannels(other)),
    };

    let plane = height * width;
    let mut out = vec![0.0f32; plane * channels];
    for (pixel, values) in raw.chunks_exact(channels).enumerate() {
        for (channel, value) in values.iter().enumerate() {
            out[channel * plane + pixel] = f32::from(*value) / 255.0;
        }
    }
    Ok(out)
}

/// Decodes and converts one image; with `augment` a horizontally flipped
/// copy follows the original
pub fn samples_from_bytes(
    bytes: &[u8],
    height: usize,
    width: usize,
    channels: usize,
    augment: bool,
) -> Result<Vec<Vec<f32>>, PreprocessError> {
    let image = decode(bytes)?;
    let mut samples = vec![to_chw(&image, height, width, channels)?];
    if augment {
        samples.push(to_chw(&image.fliph(), height, width, channels)?);
    }
    Ok(samples)
}

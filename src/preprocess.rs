// Image decoding and tensor preparation

use crate::{AnalysisError, Result};
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

/// Decode raw upload bytes into an image
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(AnalysisError::ImageDecode("empty payload".into()));
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Open and decode an image file
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path)
        .map_err(|e| AnalysisError::ImageDecode(format!("{}: {}", path.display(), e)))
}

/// Convert a decoded image into a `(1, height, width, 3)` tensor with values in `[0, 1]`.
///
/// Grayscale sources have their channel replicated, alpha and any other extra
/// channels are dropped.
pub fn preprocess(image: &DynamicImage, width: u32, height: u32) -> Result<Tensor> {
    if width == 0 || height == 0 {
        return Err(AnalysisError::InvalidConfig(format!(
            "target resolution {}x{} is empty",
            width, height
        )));
    }

    let rgb = image
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let data: Vec<f32> = rgb
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();

    Ok(Tensor::from_vec(
        data,
        (1, height as usize, width as usize, 3),
        &Device::Cpu,
    )?)
}

//! Normalized image tensors.
//!
//! Content keys are derived from a normalized view of a frame rather than
//! from file bytes, so two JPEG encodings of the same picture still collide.
//! [`normalize`] resizes to a fixed size, center-crops, and lays the pixels
//! out channel-first as `f32` in `[0, 1]` with a leading batch dimension:
//! shape `[1, 3, crop, crop]`.
//!
//! ```
//! use image::{Rgb, RgbImage};
//! use scenecap::{NormalizationConfig, normalize};
//!
//! let frame = RgbImage::from_pixel(640, 360, Rgb([255, 0, 0]));
//! let tensor = normalize(&frame, &NormalizationConfig::default())?;
//! assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
//! assert_eq!(tensor.shape_descriptor(), "(1, 3, 224, 224)");
//! # Ok::<(), scenecap::ScenecapError>(())
//! ```

use image::{
    RgbImage,
    imageops::{self, FilterType},
};

use crate::configuration::NormalizationConfig;
use crate::error::ScenecapError;

/// A dense `f32` tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl ImageTensor {
    /// Build a tensor, checking that `values` fills `shape` exactly.
    pub fn from_parts(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, ScenecapError> {
        let expected = shape.iter().product::<usize>();
        if shape.is_empty() || expected != values.len() {
            return Err(ScenecapError::ShapeMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// Dimension sizes, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Values in row-major order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// A flat copy of the values.
    pub fn flatten(&self) -> Vec<f32> {
        self.values.clone()
    }

    /// Consume the tensor, returning its values.
    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw bytes, each value as little-endian `f32`. This is what content keys hash.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|value| value.to_le_bytes()).collect()
    }

    /// Shape rendered as a tuple, e.g. `(1, 3, 224, 224)`.
    pub fn shape_descriptor(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(usize::to_string).collect();
        if dims.len() == 1 {
            format!("({},)", dims[0])
        } else {
            format!("({})", dims.join(", "))
        }
    }
}

/// Resize, center-crop, and convert `image` to a `[1, 3, crop, crop]` tensor.
///
/// # Errors
///
/// Returns [`ScenecapError::InvalidConfiguration`] if the crop does not fit
/// inside the resized image.
pub fn normalize(
    image: &RgbImage,
    config: &NormalizationConfig,
) -> Result<ImageTensor, ScenecapError> {
    config.validate()?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ScenecapError::InvalidShape(format!(
            "{}x{} image",
            image.width(),
            image.height()
        )));
    }
    let (width, height) = config.resize;
    let crop = config.center_crop;

    let resized = imageops::resize(image, width, height, FilterType::Triangle);
    let left = crop_offset(width, crop);
    let top = crop_offset(height, crop);
    let cropped = imageops::crop_imm(&resized, left, top, crop, crop).to_image();

    let plane = (crop as usize) * (crop as usize);
    let mut values = vec![0.0f32; 3 * plane];
    for (index, pixel) in cropped.pixels().enumerate() {
        for channel in 0..3 {
            values[channel * plane + index] = f32::from(pixel.0[channel]) / 255.0;
        }
    }

    ImageTensor::from_parts(vec![1, 3, crop as usize, crop as usize], values)
}

// Half-pixel offsets round to even, so a 33-pixel margin starts at 16.
fn crop_offset(dimension: u32, crop: u32) -> u32 {
    (f64::from(dimension - crop) / 2.0).round_ties_even() as u32
}

/// Parse a shape descriptor.
///
/// Accepts `(1, 3, 224, 224)`, `[1, 3, 224, 224]`, `(5,)` and
/// `torch.Size([1, 3, 224, 224])`.
pub fn parse_shape(descriptor: &str) -> Result<Vec<usize>, ScenecapError> {
    let invalid = || ScenecapError::InvalidShape(descriptor.to_string());

    let mut inner = descriptor.trim();
    if let Some(rest) = inner.strip_prefix("torch.Size") {
        inner = rest.trim();
    }
    let inner = inner
        .trim_start_matches(&['(', '['][..])
        .trim_end_matches(&[')', ']'][..])
        .trim();

    let dims = inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<usize>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;

    if dims.is_empty() {
        return Err(invalid());
    }
    Ok(dims)
}

/// Rebuild a tensor from its flattened values and shape descriptor.
///
/// Exact inverse of [`ImageTensor::flatten`] paired with
/// [`ImageTensor::shape_descriptor`].
pub fn reconstruct(flattened: &[f32], shape_descriptor: &str) -> Result<ImageTensor, ScenecapError> {
    let shape = parse_shape(shape_descriptor)?;
    ImageTensor::from_parts(shape, flattened.to_vec())
}

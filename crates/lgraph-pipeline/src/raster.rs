//! Single-channel intensity raster: the read-only pipeline input.
//!
//! Intensities are stored as `f32` normalised to `[0, 1]`. Rasters can be
//! built from an 8-bit grayscale image, from a closure, or decoded from
//! raw image bytes (PNG, JPEG, BMP, WebP).

use image::{GrayImage, ImageBuffer, Luma};

use crate::types::{Dimensions, PipelineError};

/// Floating-point single-channel image buffer.
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A 2D grid of normalised intensities (`rows x cols`).
#[derive(Debug, Clone, PartialEq)]
pub struct Raster(IntensityImage);

impl Raster {
    /// Build a raster from an 8-bit grayscale image, mapping `0..=255`
    /// onto `0.0..=1.0`.
    #[must_use]
    pub fn from_gray(gray: &GrayImage) -> Self {
        Self(ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([f32::from(gray.get_pixel(x, y).0[0]) / 255.0])
        }))
    }

    /// Build a raster by evaluating `f(row, col)` for every cell.
    ///
    /// Values are clamped into `[0, 1]`.
    #[must_use]
    pub fn from_fn(rows: u32, cols: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        Self(ImageBuffer::from_fn(cols, rows, |x, y| {
            Luma([f(y, x).clamp(0.0, 1.0)])
        }))
    }

    /// Number of rows (image height).
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.0.height()
    }

    /// Number of columns (image width).
    #[must_use]
    pub fn cols(&self) -> u32 {
        self.0.width()
    }

    /// Raster dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.cols(),
            height: self.rows(),
        }
    }

    /// `true` when either dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.cols() == 0
    }

    /// Normalised intensity at `(row, col)`.
    ///
    /// Out-of-range coordinates read as `0.0`.
    #[must_use]
    pub fn intensity(&self, row: u32, col: u32) -> f32 {
        self.0.get_pixel_checked(col, row).map_or(0.0, |p| p.0[0])
    }

    /// The underlying image buffer.
    #[must_use]
    pub const fn as_image(&self) -> &IntensityImage {
        &self.0
    }

    /// Quantise back to an 8-bit grayscale image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_gray(&self) -> GrayImage {
        ImageBuffer::from_fn(self.cols(), self.rows(), |x, y| {
            Luma([(self.0.get_pixel(x, y).0[0] * 255.0).round() as u8])
        })
    }
}

/// Decode raw image bytes into a grayscale [`Raster`].
///
/// The standard luminance formula is used for RGB-to-gray conversion.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty or decodes
/// to a zero-sized image. Returns [`PipelineError::ImageDecode`] if the
/// image format is unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<Raster, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    let raster = Raster::from_gray(&img.to_luma8());
    if raster.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    Ok(raster)
}

//! # Rendering Module
//!
//! This module turns arbitrary images into what the printhead consumes.
//!
//! ## Modules
//!
//! - [`dither`]: Grayscale, threshold, Bayer, Floyd-Steinberg and Atkinson
//! - [`bitmap`]: Feed rotation, bit matrix extraction and row packing
//!
//! ## Usage Example
//!
//! ```
//! use image::{Rgba, RgbaImage};
//! use niimbot::render::{self, dither::DitheringAlgorithm};
//!
//! let label = RgbaImage::from_pixel(313, 96, Rgba([200, 200, 200, 255]));
//! let lines = render::prepare(&label, DitheringAlgorithm::Bayer, 128)?;
//!
//! // Rotated: label height becomes the line width
//! assert_eq!(lines.width(), 96);
//! assert_eq!(lines.height(), 313);
//! # Ok::<(), niimbot::error::NiimbotError>(())
//! ```

pub mod bitmap;
pub mod dither;

use std::path::Path;

use image::RgbaImage;

use crate::error::{NiimbotError, Result};
use bitmap::BitMatrix;
use dither::DitheringAlgorithm;

/// Dither `image` and extract printer lines in one step.
pub fn prepare(
    image: &RgbaImage,
    algorithm: DitheringAlgorithm,
    threshold: u8,
) -> Result<BitMatrix> {
    let dithered = algorithm.apply_with_threshold(image, threshold);
    bitmap::to_bit_matrix(&dithered)
}

/// Load an image file as RGBA.
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path)
        .map_err(|e| NiimbotError::Image(format!("Failed to open {}: {}", path.display(), e)))?;
    Ok(img.to_rgba8())
}

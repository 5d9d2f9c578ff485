//! # Bit Matrix Extraction
//!
//! The printhead runs across the label's short edge, so the dithered raster
//! is rotated 90° clockwise before it is sliced into lines: raster columns
//! become printer rows.
//!
//! ```text
//!   raster (w x h)              printer lines (h dots wide, w rows)
//!   ┌──────────┐                ┌─────┐
//!   │ A ...    │   rotate 90°   │   A │  row 0
//!   │          │  ───────────►  │   . │  row 1
//!   │ B ...    │                │ B . │  ...
//!   └──────────┘                └─────┘
//! ```
//!
//! A rotated pixel becomes a printed dot when its red channel is ≤ 128.
//! Transparent pixels are composited onto white paper first.

use image::{GrayImage, Luma, Rgba, RgbaImage, imageops};

use crate::error::{NiimbotError, Result};

/// Channel value at or below which a dot is printed
pub const PRINT_CUTOFF: u8 = 128;

/// Rows of dots to send to the printer, one `bool` per dot (`true` = print).
///
/// Every row has the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMatrix {
    width: usize,
    rows: Vec<Vec<bool>>,
}

impl BitMatrix {
    /// Build from rows, rejecting empty or ragged input.
    pub fn new(rows: Vec<Vec<bool>>) -> Result<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || width == 0 {
            return Err(NiimbotError::InvalidParameter(
                "bit matrix must have at least one row and one column".to_string(),
            ));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(NiimbotError::InvalidParameter(format!(
                "row {} has {} dots, expected {}",
                i,
                row.len(),
                width
            )));
        }
        Ok(Self { width, rows })
    }

    /// Build from 0/1 values, handy for literals.
    pub fn from_bits(rows: &[&[u8]]) -> Result<Self> {
        Self::new(
            rows.iter()
                .map(|r| r.iter().map(|&b| b != 0).collect())
                .collect(),
        )
    }

    /// Dots per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<&[bool]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[bool]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Render as a grayscale image (black dots on white), for previews.
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.rows.len() as u32, |x, y| {
            let dot = self.rows[y as usize][x as usize];
            Luma([if dot { 0 } else { 255 }])
        })
    }
}

/// Composite onto white and rotate 90° clockwise into printer orientation.
///
/// The result is `height` wide and `width` tall, fully opaque.
pub fn rotate_for_feed(image: &RgbaImage) -> RgbaImage {
    let mut flat = image.clone();
    for pixel in flat.pixels_mut() {
        *pixel = over_white(*pixel);
    }
    imageops::rotate90(&flat)
}

fn over_white(p: Rgba<u8>) -> Rgba<u8> {
    let a = p[3] as u32;
    let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
    Rgba([blend(p[0]), blend(p[1]), blend(p[2]), 255])
}

/// Convert a dithered raster into the bit matrix the printer consumes.
pub fn to_bit_matrix(image: &RgbaImage) -> Result<BitMatrix> {
    let rotated = rotate_for_feed(image);
    let rows = rotated
        .rows()
        .map(|row| row.map(|p| p[0] <= PRINT_CUTOFF).collect())
        .collect();
    BitMatrix::new(rows)
}

/// Pack a row of dots into bytes.
///
/// ## Bit Packing
///
/// - Bit 7 (MSB) = leftmost dot
/// - 1 = print, 0 = blank
/// - The last byte is padded with zeros on the right
///
/// ## Example
///
/// ```
/// use niimbot::render::bitmap::pack_row;
///
/// let row = vec![true; 12];
/// assert_eq!(pack_row(&row), vec![0xFF, 0xF0]);
/// ```
pub fn pack_row(pixels: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; pixels.len().div_ceil(8)];
    for (i, &pixel) in pixels.iter().enumerate() {
        if pixel {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

/// Save a bit matrix as a PNG preview.
pub fn save_png(matrix: &BitMatrix, path: &std::path::Path) -> Result<()> {
    matrix
        .to_image()
        .save(path)
        .map_err(|e| NiimbotError::Image(format!("Failed to save PNG: {}", e)))
}

// ============================================================================
// TESTS
// ============================================================================

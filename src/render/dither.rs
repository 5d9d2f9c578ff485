//! # Dithering Algorithms
//!
//! This module converts continuous-tone images to black/white output suitable
//! for thermal label printers. Five interchangeable transforms are provided.
//!
//! ## Luminance
//!
//! All transforms start from the same weighted brightness:
//!
//! ```text
//! L = 0.299 R + 0.587 G + 0.114 B
//! ```
//!
//! The result is written back into R, G and B, so the output is still a
//! normal RGBA image. Alpha is never touched, and width and height are
//! preserved. Storing a fractional value into a channel rounds half to even
//! and clamps to 0-255.
//!
//! ## Algorithms
//!
//! | Algorithm | Kind | Output | Notes |
//! |-----------|------|--------|-------|
//! | Grayscale | none | 256 levels | Not binarized |
//! | Threshold | point | bilevel | `L < t` is black |
//! | Bayer | ordered | bilevel | 4x4 matrix, regular texture |
//! | Floyd-Steinberg | error diffusion | bilevel | Conserves all error (16/16) |
//! | Atkinson | error diffusion | bilevel | Diffuses 6/8 of the error, lighter output |
//!
//! ## Error Diffusion Layout
//!
//! Error is added to a flat luminance buffer in raster order. Neighbours are
//! addressed by flat offset, so "next pixel" on the last column is the first
//! pixel of the following row, and writes past the end of the image are
//! dropped.
//!
//! ```text
//! Floyd-Steinberg (/16)      Atkinson (/8)
//!
//!        X   7                  X   1   1
//!    3   5   1              1   1   1
//!                               1
//! ```
//!
//! ## Usage Example
//!
//! ```
//! use image::{Rgba, RgbaImage};
//! use niimbot::render::dither::DitheringAlgorithm;
//!
//! let gray = RgbaImage::from_pixel(16, 16, Rgba([128, 128, 128, 255]));
//! let out = DitheringAlgorithm::Atkinson.apply(&gray);
//!
//! assert_eq!(out.dimensions(), (16, 16));
//! assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
//! ```

use std::str::FromStr;

use image::RgbaImage;

use crate::error::NiimbotError;

/// Default cut-off for threshold and Bayer dithering
pub const DEFAULT_THRESHOLD: u8 = 128;

/// Fixed cut-off used by the error-diffusion algorithms
pub const DIFFUSION_THRESHOLD: u8 = 129;

/// Bayer 4x4 threshold map, indexed `[x mod 4][y mod 4]`.
///
/// Values are pre-scaled to the 0-255 range.
pub const BAYER4: [[u8; 4]; 4] = [
    [15, 135, 45, 165],
    [195, 75, 225, 105],
    [60, 180, 30, 150],
    [240, 120, 210, 90],
];

/// Dithering algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitheringAlgorithm {
    /// Luminance only, no binarization
    Grayscale,
    /// Simple threshold
    Threshold,
    /// Ordered dithering with the 4x4 Bayer map
    Bayer,
    /// Floyd-Steinberg error diffusion
    FloydSteinberg,
    /// Atkinson error diffusion
    #[default]
    Atkinson,
}

impl DitheringAlgorithm {
    pub const ALL: [DitheringAlgorithm; 5] = [
        DitheringAlgorithm::Grayscale,
        DitheringAlgorithm::Threshold,
        DitheringAlgorithm::Bayer,
        DitheringAlgorithm::FloydSteinberg,
        DitheringAlgorithm::Atkinson,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            DitheringAlgorithm::Grayscale => "grayscale",
            DitheringAlgorithm::Threshold => "threshold",
            DitheringAlgorithm::Bayer => "bayer",
            DitheringAlgorithm::FloydSteinberg => "floyd-steinberg",
            DitheringAlgorithm::Atkinson => "atkinson",
        }
    }

    /// Apply with the default threshold.
    pub fn apply(self, image: &RgbaImage) -> RgbaImage {
        self.apply_with_threshold(image, DEFAULT_THRESHOLD)
    }

    /// Apply to a private copy of `image`.
    ///
    /// `threshold` only affects [`Threshold`](Self::Threshold) and
    /// [`Bayer`](Self::Bayer); the diffusion algorithms always cut at 129.
    pub fn apply_with_threshold(self, image: &RgbaImage, threshold: u8) -> RgbaImage {
        let mut out = image.clone();
        match self {
            DitheringAlgorithm::Grayscale => grayscale(&mut out),
            DitheringAlgorithm::Threshold => threshold_in_place(&mut out, threshold),
            DitheringAlgorithm::Bayer => bayer(&mut out, threshold),
            DitheringAlgorithm::FloydSteinberg => diffuse(&mut out, &FLOYD_STEINBERG),
            DitheringAlgorithm::Atkinson => diffuse(&mut out, &ATKINSON),
        }
        out
    }
}

impl FromStr for DitheringAlgorithm {
    type Err = NiimbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grayscale" | "greyscale" | "gray" => Ok(DitheringAlgorithm::Grayscale),
            "none" | "threshold" => Ok(DitheringAlgorithm::Threshold),
            "bayer" => Ok(DitheringAlgorithm::Bayer),
            "floyd-steinberg" | "floyd_steinberg" | "floydsteinberg" | "fs" => {
                Ok(DitheringAlgorithm::FloydSteinberg)
            }
            "atkinson" => Ok(DitheringAlgorithm::Atkinson),
            other => Err(NiimbotError::InvalidParameter(format!(
                "unknown dithering algorithm '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DitheringAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Weighted brightness of an RGB triple.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> f64 {
    r as f64 * 0.299 + g as f64 * 0.587 + b as f64 * 0.114
}

/// Store a fractional value into a byte channel: round half to even, clamp.
#[inline]
pub fn to_channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0).round_ties_even() as u8
}

#[inline]
fn bilevel(black: bool) -> u8 {
    if black { 0 } else { 255 }
}

#[inline]
fn fill_rgb(pixel: &mut image::Rgba<u8>, value: u8) {
    pixel[0] = value;
    pixel[1] = value;
    pixel[2] = value;
}

fn grayscale(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let l = luminance(pixel[0], pixel[1], pixel[2]);
        fill_rgb(pixel, to_channel(l));
    }
}

fn threshold_in_place(image: &mut RgbaImage, threshold: u8) {
    for pixel in image.pixels_mut() {
        let l = luminance(pixel[0], pixel[1], pixel[2]);
        fill_rgb(pixel, bilevel(l < threshold as f64));
    }
}

fn bayer(image: &mut RgbaImage, threshold: u8) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let l = luminance(pixel[0], pixel[1], pixel[2]);
        let m = BAYER4[(x % 4) as usize][(y % 4) as usize] as f64;
        let mapped = ((l + m) / 2.0).floor();
        fill_rgb(pixel, bilevel(mapped < threshold as f64));
    }
}

// ============================================================================
// ERROR DIFFUSION
// ============================================================================

/// An error-diffusion kernel: where the quantization error goes and how much.
#[derive(Debug, Clone, Copy)]
pub struct ErrorKernel {
    /// Quantization error is divided (flooring) by this before distribution
    pub divisor: i32,
    /// `(dx, dy, weight)` receivers relative to the current pixel
    pub taps: &'static [(isize, isize, i32)],
}

impl ErrorKernel {
    /// Sum of all receiver weights. Equal to `divisor` for a kernel that
    /// conserves the full error.
    pub fn weight_sum(&self) -> i32 {
        self.taps.iter().map(|&(_, _, w)| w).sum()
    }
}

pub const FLOYD_STEINBERG: ErrorKernel = ErrorKernel {
    divisor: 16,
    taps: &[(1, 0, 7), (-1, 1, 3), (0, 1, 5), (1, 1, 1)],
};

pub const ATKINSON: ErrorKernel = ErrorKernel {
    divisor: 8,
    taps: &[(1, 0, 1), (2, 0, 1), (-1, 1, 1), (0, 1, 1), (1, 1, 1), (0, 2, 1)],
};

fn diffuse(image: &mut RgbaImage, kernel: &ErrorKernel) {
    let width = image.width() as isize;
    let mut lum: Vec<u8> = image
        .pixels()
        .map(|p| to_channel(luminance(p[0], p[1], p[2])))
        .collect();
    let len = lum.len() as isize;

    for (l, pixel) in image.pixels_mut().enumerate() {
        let current = lum[l];
        let value = bilevel(current < DIFFUSION_THRESHOLD);
        let error = (current as i32 - value as i32).div_euclid(kernel.divisor);
        fill_rgb(pixel, value);

        for &(dx, dy, weight) in kernel.taps {
            let idx = l as isize + dx + dy * width;
            if (0..len).contains(&idx) {
                let slot = &mut lum[idx as usize];
                *slot = (*slot as i32 + error * weight).clamp(0, 255) as u8;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

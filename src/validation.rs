//! Decoded-frame validation for known test patterns.
//!
//! These checks run on frames after they went through the capture decode
//! path, so they catch both driver problems and colour conversion bugs.
//! Useful for integration testing with virtual cameras.

use image::RgbImage;

use crate::traits::{CameraError, Result};

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u8 = 15;

/// Minimum luminance rise across a gradient frame.
const MIN_GRADIENT_RISE: f32 = 50.0;

fn pixel(image: &RgbImage, x: u32, y: u32) -> Result<(u8, u8, u8)> {
    image
        .get_pixel_checked(x, y)
        .map(|p| (p.0[0], p.0[1], p.0[2]))
        .ok_or_else(|| CameraError::StreamError(format!("Failed to get pixel at ({x}, {y})")))
}

/// Validates that a decoded frame shows the SMPTE color bar pattern.
///
/// Samples the centre of each of the 8 vertical bars on the middle row.
pub fn validate_color_bars(image: &RgbImage) -> Result<()> {
    let (width, height) = image.dimensions();
    let bar_width = width / 8;
    let center_y = height / 2;

    for (bar_idx, expected) in (0u32..).zip(SMPTE_COLOR_BARS.iter()) {
        let sample_x = bar_idx * bar_width + bar_width / 2;
        let actual = pixel(image, sample_x, center_y)?;

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(CameraError::StreamError(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a decoded frame shows a left-to-right luminance ramp.
///
/// The middle row must not get darker by more than rounding noise, and must
/// brighten by a clear margin overall.
pub fn validate_gradient(image: &RgbImage) -> Result<()> {
    let (width, height) = image.dimensions();
    let center_y = height / 2;

    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..width).step_by(10) {
        let (r, g, b) = pixel(image, x, center_y)?;
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev {
            if luminance < prev - 1.0 {
                return Err(CameraError::StreamError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    let rise = prev.zip(first).map_or(0.0, |(last, first)| last - first);
    if rise < MIN_GRADIENT_RISE {
        return Err(CameraError::StreamError(format!(
            "Insufficient luminance change for gradient: {rise} \
             (expected at least {MIN_GRADIENT_RISE})"
        )));
    }

    Ok(())
}

fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}

//! Frame colors and the per-channel operations applied to them

use crate::models::Strip;

/// 8-bit linear RGB color of one LED
pub type Color = palette::rgb::LinSrgb<u8>;

/// Maximum value of the sum of the three channels of a [Color]
pub const MAX_BRIGHTNESS: u16 = 3 * 255;

fn lerp_channel(a: u8, b: u8, factor: f32) -> u8 {
    let value = a as f32 * factor + b as f32 * (1.0 - factor);
    // Halves round up
    (value + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// Linear interpolation between two colors
///
/// Computes `a * factor + b * (1 - factor)` on each channel independently and rounds to the
/// nearest channel value. A factor of `1.0` yields `a`, `0.0` yields `b`.
pub fn lerp(a: Color, b: Color, factor: f32) -> Color {
    Color::new(
        lerp_channel(a.red, b.red, factor),
        lerp_channel(a.green, b.green, factor),
        lerp_channel(a.blue, b.blue, factor),
    )
}

/// Per-strip brightness correction
///
/// Each channel is first scaled by its reduction factor, then the whole color is scaled down so
/// the sum of its channels does not exceed the maximum brightness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    reduction: [f32; 3],
    max_brightness: u16,
}

impl Default for Correction {
    fn default() -> Self {
        Self {
            reduction: [1.0; 3],
            max_brightness: MAX_BRIGHTNESS,
        }
    }
}

impl From<&Strip> for Correction {
    fn from(strip: &Strip) -> Self {
        Self {
            reduction: [strip.reduction_r, strip.reduction_g, strip.reduction_b],
            max_brightness: strip.max_brightness.min(MAX_BRIGHTNESS),
        }
    }
}

impl Correction {
    pub fn apply(&self, color: Color) -> Color {
        let (r, g, b) = color.into_components();
        let mut channels = [
            r as f32 * self.reduction[0],
            g as f32 * self.reduction[1],
            b as f32 * self.reduction[2],
        ];

        let sum: f32 = channels.iter().sum();
        let max = self.max_brightness as f32;
        if sum > max {
            for channel in &mut channels {
                *channel = *channel * max / sum;
            }
        }

        // Truncate so the channel sum stays under the cap
        let [r, g, b] = channels.map(|channel| channel.clamp(0.0, 255.0) as u8);
        Color::new(r, g, b)
    }
}

/*!
 # RGBW colour model

 Four independent 8-bit channels. Anything that arrives as a wider integer
 is clamped per channel into `0..=255` before it becomes a [`Color`].
*/

use std::fmt;

/// An RGBW colour as written to every pixel of the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
    /// White channel
    pub w: u8,
}

impl Color {
    /// All channels dark
    pub const OFF: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    /// Builds a colour from unbounded channel values, clamping each into `0..=255`
    pub fn clamped(r: i32, g: i32, b: i32, w: i32) -> Self {
        Self::new(clamp_channel(r), clamp_channel(g), clamp_channel(b), clamp_channel(w))
    }

    /// Channels in wire order
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.w]
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }

    /// True when every channel is zero
    pub fn is_off(self) -> bool {
        self == Self::OFF
    }

    /// Linear interpolation for step `step` of `steps`.
    ///
    /// Each channel is `round(start + (target - start) * step / steps)`.
    /// `step == steps` always yields `target` exactly.
    pub fn interpolate(start: Color, target: Color, step: u32, steps: u32) -> Color {
        if steps == 0 || step >= steps {
            return target;
        }
        let t = step as f32 / steps as f32;
        let channel = |from: u8, to: u8| -> u8 {
            let value = from as f32 + (to as f32 - from as f32) * t;
            clamp_channel(value.round() as i32)
        };
        Color::new(
            channel(start.r, target.r),
            channel(start.g, target.g),
            channel(start.b, target.b),
            channel(start.w, target.w),
        )
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RGBW({}, {}, {}, {})", self.r, self.g, self.b, self.w)
    }
}

impl From<(u8, u8, u8, u8)> for Color {
    fn from((r, g, b, w): (u8, u8, u8, u8)) -> Self {
        Self::new(r, g, b, w)
    }
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

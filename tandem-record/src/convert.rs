//! Conversion of native frames into the 8-bit RGB frames video sinks take.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tandem_capture::{Frame, Gray16Image};

/// Full scale of the 12-bit raw ToF counts.
pub const RAW_FULL_SCALE: f32 = 4096.0;

/// Linearly map `value` from `[0, max]` to `[0, 255]`, clipping at both ends.
pub fn scale_to_u8(value: f32, max: f32) -> u8 {
    if max.is_nan() || value.is_nan() || max <= 0.0 || value <= 0.0 {
        return 0;
    }
    if value >= max {
        return 255;
    }
    (value * 255.0 / max).round().clamp(0.0, 255.0) as u8
}

/// False-color lookup tables for depth visualisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    /// Blue (near) through green to red (far).
    Jet,
    /// Black through red and yellow to white.
    Hot,
}

impl Colormap {
    /// Build the 256-entry table.
    pub fn table(self) -> [[u8; 3]; 256] {
        let mut lut = [[0u8; 3]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let x = i as f32 / 255.0;
            let (r, g, b) = match self {
                Colormap::Jet => (
                    1.5 - (4.0 * x - 3.0).abs(),
                    1.5 - (4.0 * x - 2.0).abs(),
                    1.5 - (4.0 * x - 1.0).abs(),
                ),
                Colormap::Hot => (3.0 * x, 3.0 * x - 1.0, 3.0 * x - 2.0),
            };
            *entry = [unit_to_u8(r), unit_to_u8(g), unit_to_u8(b)];
        }
        lut
    }
}

impl std::str::FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jet" => Ok(Colormap::Jet),
            "hot" => Ok(Colormap::Hot),
            other => Err(format!("unknown colormap '{other}' (expected jet, hot)")),
        }
    }
}

fn unit_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Ranges and color options for frame conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Depth values at or beyond this distance map to 255.
    pub max_distance_mm: f32,
    /// Nominal full scale of the amplitude channel.
    pub amplitude_max: f32,
    /// Color map applied to depth; gray when unset.
    pub depth_colormap: Option<Colormap>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            max_distance_mm: 4000.0,
            amplitude_max: 1024.0,
            depth_colormap: None,
        }
    }
}

/// Turns any `Frame` into an RGB frame.
#[derive(Clone)]
pub struct Converter {
    options: ConvertOptions,
    lut: Option<[[u8; 3]; 256]>,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        let lut = options.depth_colormap.map(Colormap::table);
        Self { options, lut }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn convert(&self, frame: &Frame) -> RgbImage {
        match frame {
            Frame::Depth(depth) if depth.raw => gray_to_rgb(&depth.image, RAW_FULL_SCALE, None),
            Frame::Depth(depth) => {
                gray_to_rgb(&depth.image, self.options.max_distance_mm, self.lut.as_ref())
            }
            Frame::Amplitude(amplitude) => {
                gray_to_rgb(&amplitude.image, self.options.amplitude_max, None)
            }
            Frame::Color(color) => color.image.clone(),
        }
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConvertOptions::default())
    }
}

fn gray_to_rgb(image: &Gray16Image, max: f32, lut: Option<&[[u8; 3]; 256]>) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut out = RgbImage::new(width, height);
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        let level = scale_to_u8(src.0[0] as f32, max);
        *dst = match lut {
            Some(lut) => Rgb(lut[level as usize]),
            None => Rgb([level, level, level]),
        };
    }
    out
}

//! Plane layouts delivered by ToF sensors.

use crate::frame::{AmplitudeFrame, DepthFrame, Frame, Gray16Image};
use crate::source::CaptureError;

/// How planes are packed into one V4L2 buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TofLayout {
    /// One depth plane in millimetres.
    #[default]
    Depth,
    /// Depth plane followed by an amplitude plane of the same size.
    Stacked,
    /// One plane of raw 12-bit sensor counts.
    Raw,
}

impl std::str::FromStr for TofLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "depth" => Ok(TofLayout::Depth),
            "stacked" | "depth+amplitude" => Ok(TofLayout::Stacked),
            "raw" => Ok(TofLayout::Raw),
            other => Err(format!("unknown ToF layout '{other}' (expected depth, stacked, raw)")),
        }
    }
}

/// ToF device selection and mode.
#[derive(Debug, Clone, PartialEq)]
pub struct TofSettings {
    /// Device path such as `/dev/video0`, or a bare index.
    pub device: String,
    /// Width and height of one plane.
    pub width: u32,
    pub height: u32,
    pub layout: TofLayout,
    pub fps: f32,
}

impl Default for TofSettings {
    fn default() -> Self {
        Self {
            device: "0".to_string(),
            width: 240,
            height: 180,
            layout: TofLayout::Depth,
            fps: 20.0,
        }
    }
}

/// Cut a buffer of 16-bit samples into frames according to `layout`.
pub fn split_planes(
    mut samples: Vec<u16>,
    width: u32,
    height: u32,
    layout: TofLayout,
    timestamp: f64,
) -> Result<Vec<Frame>, CaptureError> {
    let plane = (width * height) as usize;
    let planes = match layout {
        TofLayout::Stacked => 2,
        TofLayout::Depth | TofLayout::Raw => 1,
    };
    if samples.len() < plane * planes {
        return Err(CaptureError::CaptureFailed(format!(
            "short buffer: {} samples, expected {}",
            samples.len(),
            plane * planes
        )));
    }
    samples.truncate(plane * planes);

    let amplitude = if layout == TofLayout::Stacked {
        Some(samples.split_off(plane))
    } else {
        None
    };

    let depth = Gray16Image::from_raw(width, height, samples)
        .ok_or_else(|| CaptureError::CaptureFailed("depth plane size mismatch".to_string()))?;
    let mut frames = vec![Frame::Depth(DepthFrame {
        image: depth,
        timestamp,
        raw: layout == TofLayout::Raw,
    })];

    if let Some(amplitude) = amplitude {
        let image = Gray16Image::from_raw(width, height, amplitude).ok_or_else(|| {
            CaptureError::CaptureFailed("amplitude plane size mismatch".to_string())
        })?;
        frames.push(Frame::Amplitude(AmplitudeFrame { image, timestamp }));
    }

    Ok(frames)
}

//! Frame types produced by capture sources.

use image::{ImageBuffer, Luma, RgbImage};

/// Single-channel 16-bit image (depth in millimetres, amplitude, or raw sensor counts).
pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Which logical stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameKind {
    Depth,
    Amplitude,
    Color,
}

impl FrameKind {
    /// Suffix used when naming the output file for this stream.
    pub fn file_suffix(self) -> &'static str {
        match self {
            FrameKind::Depth => "depth",
            FrameKind::Amplitude => "amplitude",
            FrameKind::Color => "camera",
        }
    }
}

/// Per-pixel distance from a ToF sensor.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub image: Gray16Image,
    /// Seconds since the source was opened.
    pub timestamp: f64,
    /// True when the plane holds raw 12-bit sensor counts rather than millimetres.
    pub raw: bool,
}

/// Reflected signal strength from a ToF sensor.
#[derive(Debug, Clone)]
pub struct AmplitudeFrame {
    pub image: Gray16Image,
    pub timestamp: f64,
}

/// 8-bit RGB frame from a conventional camera.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub image: RgbImage,
    pub timestamp: f64,
}

/// One frame from a source, tagged by stream.
#[derive(Debug, Clone)]
pub enum Frame {
    Depth(DepthFrame),
    Amplitude(AmplitudeFrame),
    Color(ColorFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Depth(_) => FrameKind::Depth,
            Frame::Amplitude(_) => FrameKind::Amplitude,
            Frame::Color(_) => FrameKind::Color,
        }
    }

    /// Get image dimensions (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Depth(f) => f.image.dimensions(),
            Frame::Amplitude(f) => f.image.dimensions(),
            Frame::Color(f) => f.image.dimensions(),
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Frame::Depth(f) => f.timestamp,
            Frame::Amplitude(f) => f.timestamp,
            Frame::Color(f) => f.timestamp,
        }
    }
}

/// Everything one acquisition returned.
///
/// A ToF device can deliver depth and amplitude planes from the same exposure,
/// so a sample may hold more than one frame. Frames within a sample have
/// distinct kinds.
#[derive(Debug, Clone)]
pub struct Sample {
    pub frames: Vec<Frame>,
    /// Per-source counter, starting at 1.
    pub sequence: u64,
}

impl Sample {
    pub fn new(frames: Vec<Frame>, sequence: u64) -> Self {
        Self { frames, sequence }
    }

    pub fn get(&self, kind: FrameKind) -> Option<&Frame> {
        self.frames.iter().find(|f| f.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

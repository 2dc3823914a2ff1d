//! Synthetic test-pattern source for running the pipeline without hardware.

use crate::frame::{AmplitudeFrame, ColorFrame, DepthFrame, Frame, Gray16Image, Sample};
use crate::source::{CaptureError, CaptureSource};
use image::{Rgb, RgbImage};
use std::thread;
use std::time::{Duration, Instant};

/// What the pattern source pretends to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Scrolling color gradient, like a webcam.
    Color,
    /// Depth ramp, like a ToF camera in depth mode.
    Depth,
    /// Depth ramp plus an amplitude plane.
    DepthAmplitude,
}

/// Generates frames at a fixed rate.
pub struct PatternSource {
    name: String,
    kind: PatternKind,
    width: u32,
    height: u32,
    period: Duration,
    started: Instant,
    next_due: Instant,
    sequence: u64,
    active: bool,
}

impl PatternSource {
    pub fn new(name: &str, kind: PatternKind, width: u32, height: u32, fps: f32) -> Self {
        let period = Duration::from_secs_f32(1.0 / fps.max(0.1));
        let now = Instant::now();
        Self {
            name: name.to_string(),
            kind,
            width,
            height,
            period,
            started: now,
            next_due: now,
            sequence: 0,
            active: true,
        }
    }

    fn render(&self, timestamp: f64) -> Vec<Frame> {
        let shift = self.sequence as u32;
        match self.kind {
            PatternKind::Color => {
                let image = RgbImage::from_fn(self.width, self.height, |x, y| {
                    Rgb([
                        ((x + shift) % 256) as u8,
                        (y % 256) as u8,
                        ((x + y + shift * 3) % 256) as u8,
                    ])
                });
                vec![Frame::Color(ColorFrame { image, timestamp })]
            }
            PatternKind::Depth | PatternKind::DepthAmplitude => {
                let width = self.width.max(1);
                let depth = Gray16Image::from_fn(self.width, self.height, |x, _| {
                    image::Luma([(((x + shift) % width) * 4000 / width) as u16])
                });
                let mut frames = vec![Frame::Depth(DepthFrame {
                    image: depth,
                    timestamp,
                    raw: false,
                })];
                if self.kind == PatternKind::DepthAmplitude {
                    let (cx, cy) = (self.width as f32 / 2.0, self.height as f32 / 2.0);
                    let reach = (cx * cx + cy * cy).sqrt().max(1.0);
                    let amplitude = Gray16Image::from_fn(self.width, self.height, |x, y| {
                        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
                        image::Luma([((1.0 - d / reach) * 1024.0) as u16])
                    });
                    frames.push(Frame::Amplitude(AmplitudeFrame {
                        image: amplitude,
                        timestamp,
                    }));
                }
                frames
            }
        }
    }
}

impl CaptureSource for PatternSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&mut self, timeout: Duration) -> Result<Sample, CaptureError> {
        if !self.active {
            return Err(CaptureError::Disconnected(format!("{} stopped", self.name)));
        }

        let now = Instant::now();
        let wait = self.next_due.saturating_duration_since(now);
        if wait > timeout {
            thread::sleep(timeout);
            return Err(CaptureError::Timeout(timeout));
        }
        thread::sleep(wait);

        let timestamp = self.started.elapsed().as_secs_f64();
        let frames = self.render(timestamp);
        self.sequence += 1;
        self.next_due = (self.next_due + self.period).max(Instant::now());
        Ok(Sample::new(frames, self.sequence))
    }

    fn frame_rate(&self) -> Option<f32> {
        Some(1.0 / self.period.as_secs_f32())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn stop(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    #[test]
    fn test_color_pattern_produces_requested_size() {
        let mut source = PatternSource::new("usb", PatternKind::Color, 64, 48, 100.0);
        let sample = source.acquire(Duration::from_secs(1)).unwrap();
        assert_eq!(sample.frames.len(), 1);
        assert_eq!(sample.frames[0].dimensions(), (64, 48));
        assert_eq!(sample.sequence, 1);
    }

    #[test]
    fn test_depth_amplitude_pattern_has_two_planes() {
        let mut source = PatternSource::new("tof", PatternKind::DepthAmplitude, 24, 18, 100.0);
        let sample = source.acquire(Duration::from_secs(1)).unwrap();
        assert!(sample.get(FrameKind::Depth).is_some());
        assert!(sample.get(FrameKind::Amplitude).is_some());
    }

    #[test]
    fn test_short_timeout_before_next_frame_times_out() {
        let mut source = PatternSource::new("tof", PatternKind::Depth, 8, 8, 1.0);
        source.acquire(Duration::from_secs(1)).unwrap();
        let result = source.acquire(Duration::from_millis(5));
        assert!(matches!(result, Err(CaptureError::Timeout(_))));
    }

    #[test]
    fn test_stopped_source_reports_disconnect() {
        let mut source = PatternSource::new("usb", PatternKind::Color, 8, 8, 30.0);
        source.stop();
        source.stop();
        assert!(!source.is_active());
        assert!(matches!(
            source.acquire(Duration::from_millis(5)),
            Err(CaptureError::Disconnected(_))
        ));
    }
}

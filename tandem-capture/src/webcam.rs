//! Webcam capture using nokhwa.

use crate::frame::{ColorFrame, Frame, Sample};
use crate::reader::ReaderThread;
use crate::source::{CaptureError, CaptureSource};
use image::RgbImage;
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use std::time::Duration;
use tracing::{debug, info};

/// Requested webcam settings. The driver may pick the closest supported mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebcamSettings {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Webcam capture source.
pub struct WebcamSource {
    reader: ReaderThread,
    settings: WebcamSettings,
    active: bool,
    frames: u64,
}

impl WebcamSource {
    /// Create a new webcam capture from device index with default settings.
    pub fn new(index: u32) -> Result<Self, CaptureError> {
        Self::open(WebcamSettings {
            index,
            ..WebcamSettings::default()
        })
    }

    /// Open the webcam and start streaming.
    pub fn open(settings: WebcamSettings) -> Result<Self, CaptureError> {
        info!(
            "Opening webcam {} at {}x{} @ {} fps",
            settings.index, settings.width, settings.height, settings.fps
        );

        let reader = ReaderThread::spawn(
            &format!("webcam{}", settings.index),
            move || open_camera(settings),
            |camera: &mut Camera, timestamp| {
                let frame = camera
                    .frame()
                    .map_err(|e| CaptureError::from_driver_message(e.to_string()))?;

                let decoded = frame
                    .decode_image::<RgbFormat>()
                    .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

                let (width, height) = (decoded.width(), decoded.height());
                let image = RgbImage::from_raw(width, height, decoded.into_raw()).ok_or_else(|| {
                    CaptureError::CaptureFailed("Failed to create RGB image".to_string())
                })?;

                Ok(vec![Frame::Color(ColorFrame { image, timestamp })])
            },
        )?;

        Ok(Self {
            reader,
            settings,
            active: true,
            frames: 0,
        })
    }

    /// List available webcam devices.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let devices = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CaptureError::DeviceNotFound(e.to_string()))?;

        Ok(devices
            .into_iter()
            .map(|info| format!("{}: {}", info.index(), info.human_name()))
            .collect())
    }

    /// Find the first index below `max_index` that opens and delivers a frame.
    pub fn detect(
        max_index: u32,
        settings: WebcamSettings,
        timeout: Duration,
    ) -> Result<Self, CaptureError> {
        for index in 0..max_index {
            let candidate = WebcamSettings { index, ..settings };
            match Self::open(candidate) {
                Ok(mut source) => match source.acquire(timeout) {
                    Ok(_) => {
                        info!("Auto-detected webcam at index {}", index);
                        return Ok(source);
                    }
                    Err(e) => debug!("Webcam {} opened but produced no frame: {}", index, e),
                },
                Err(e) => debug!("Webcam {} unavailable: {}", index, e),
            }
        }
        Err(CaptureError::DeviceNotFound(format!(
            "no working webcam among indices 0..{}",
            max_index
        )))
    }

    pub fn settings(&self) -> WebcamSettings {
        self.settings
    }
}

fn open_camera(settings: WebcamSettings) -> Result<Camera, CaptureError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            Resolution::new(settings.width, settings.height),
            FrameFormat::MJPEG,
            settings.fps,
        ),
    ));

    let device = format!("webcam {}", settings.index);
    let mut camera = Camera::new(CameraIndex::Index(settings.index), requested).map_err(|e| {
        CaptureError::OpenFailed {
            device: device.clone(),
            reason: e.to_string(),
        }
    })?;
    camera
        .open_stream()
        .map_err(|e| CaptureError::OpenFailed {
            device,
            reason: e.to_string(),
        })?;

    let resolution = camera.resolution();
    info!(
        "Webcam opened: {}x{} @ {} fps",
        resolution.width(),
        resolution.height(),
        camera.frame_rate()
    );
    Ok(camera)
}

impl CaptureSource for WebcamSource {
    fn name(&self) -> &str {
        "usb"
    }

    fn acquire(&mut self, timeout: Duration) -> Result<Sample, CaptureError> {
        if !self.active {
            return Err(CaptureError::Disconnected("webcam stopped".to_string()));
        }
        let sample = self.reader.recv(timeout)?;
        self.frames += 1;
        Ok(sample)
    }

    fn frame_rate(&self) -> Option<f32> {
        Some(self.settings.fps as f32)
    }

    fn is_active(&self) -> bool {
        self.active && self.reader.is_running()
    }

    fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.reader.stop();
        info!("Webcam capture stopped after {} frames", self.frames);
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        self.stop();
    }
}

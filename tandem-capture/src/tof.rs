//! Time-of-flight capture through the sensor's V4L2 node.
//!
//! The sensor driver exposes 16-bit little-endian planes (`Y16 `). Depending
//! on the firmware mode a buffer holds a depth plane, a depth plane stacked
//! on top of an amplitude plane, or raw 12-bit phase counts.

use crate::frame::{Frame, Sample};
use crate::layout::{TofLayout, TofSettings, split_planes};
use crate::reader::ReaderThread;
use crate::source::{CaptureError, CaptureSource};
use std::time::Duration;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const BUFFER_COUNT: u32 = 4;

/// Driver-level wait for one buffer. Bounds how long a stalled sensor can
/// keep the reader from seeing a stop.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

struct TofDevice {
    _device: Device,
    stream: Stream<'static>,
    width: u32,
    height: u32,
}

/// ToF depth camera source.
pub struct TofSource {
    reader: ReaderThread,
    settings: TofSettings,
    active: bool,
    frames: u64,
}

impl TofSource {
    /// Open the device and start streaming.
    pub fn open(settings: TofSettings) -> Result<Self, CaptureError> {
        info!(
            "Opening ToF camera {} ({:?}, {}x{})",
            settings.device, settings.layout, settings.width, settings.height
        );

        let open_settings = settings.clone();
        let layout = settings.layout;
        let reader = ReaderThread::spawn(
            "tof",
            move || open_device(&open_settings),
            move |device: &mut TofDevice, timestamp| read_planes(device, layout, timestamp),
        )?;

        Ok(Self {
            reader,
            settings,
            active: true,
            frames: 0,
        })
    }

    /// List V4L2 capture nodes.
    pub fn list_devices() -> Vec<String> {
        v4l::context::enum_devices()
            .into_iter()
            .map(|node| {
                format!(
                    "{}: {}",
                    node.path().display(),
                    node.name().unwrap_or_else(|| "unknown".to_string())
                )
            })
            .collect()
    }

    pub fn settings(&self) -> &TofSettings {
        &self.settings
    }
}

fn open_device(settings: &TofSettings) -> Result<TofDevice, CaptureError> {
    let open_failed = |reason: String| CaptureError::OpenFailed {
        device: settings.device.clone(),
        reason,
    };

    let device = match settings.device.parse::<usize>() {
        Ok(index) => Device::new(index),
        Err(_) => Device::with_path(&settings.device),
    }
    .map_err(|e| open_failed(e.to_string()))?;

    let buffer_height = match settings.layout {
        TofLayout::Stacked => settings.height * 2,
        TofLayout::Depth | TofLayout::Raw => settings.height,
    };
    let requested = Format::new(settings.width, buffer_height, FourCC::new(b"Y16 "));
    let actual = device
        .set_format(&requested)
        .map_err(|e| open_failed(format!("Failed to set format: {e}")))?;

    if actual.fourcc != FourCC::new(b"Y16 ") {
        return Err(CaptureError::UnsupportedFormat(format!(
            "driver offered {} instead of Y16",
            actual.fourcc
        )));
    }
    if actual.width != settings.width || actual.height != buffer_height {
        warn!(
            "ToF driver adjusted resolution to {}x{}",
            actual.width, actual.height
        );
    }

    let mut stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
        .map_err(|e| open_failed(format!("Failed to create stream: {e}")))?;
    stream.set_timeout(READ_TIMEOUT);

    let height = match settings.layout {
        TofLayout::Stacked => actual.height / 2,
        TofLayout::Depth | TofLayout::Raw => actual.height,
    };
    info!("ToF camera opened: {}x{}", actual.width, height);

    Ok(TofDevice {
        _device: device,
        stream,
        width: actual.width,
        height,
    })
}

fn read_planes(
    device: &mut TofDevice,
    layout: TofLayout,
    timestamp: f64,
) -> Result<Vec<Frame>, CaptureError> {
    // The mmap buffer is requeued on the next dequeue, so copy out now.
    let samples: Vec<u16> = {
        let (buf, _meta) = device
            .stream
            .next()
            .map_err(|e| CaptureError::from_read_error(&e, READ_TIMEOUT))?;
        bytemuck::pod_collect_to_vec::<u8, u16>(&buf[..buf.len() & !1])
            .into_iter()
            .map(u16::from_le)
            .collect()
    };

    split_planes(samples, device.width, device.height, layout, timestamp)
}

impl CaptureSource for TofSource {
    fn name(&self) -> &str {
        "tof"
    }

    fn acquire(&mut self, timeout: Duration) -> Result<Sample, CaptureError> {
        if !self.active {
            return Err(CaptureError::Disconnected("ToF camera stopped".to_string()));
        }
        let sample = self.reader.recv(timeout)?;
        self.frames += 1;
        Ok(sample)
    }

    fn frame_rate(&self) -> Option<f32> {
        Some(self.settings.fps)
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
        info!("ToF capture stopped after {} frames", self.frames);
    }
}

impl Drop for TofSource {
    fn drop(&mut self) {
        self.stop();
    }
}

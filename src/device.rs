//! V4L2 capture backend implementation using the v4l crate.

use std::time::Duration;

use tracing::debug;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    BackendKind, CameraError, CaptureBackend, CaptureConfig, CaptureHandle, DeviceCapabilities,
    DeviceSelector, Format, FourCC, Frame, Result,
};

/// Pixel formats the decoder understands.
const DECODABLE: [FourCC; 3] = [FourCC::YUYV, FourCC::MJPG, FourCC::RGB3];

/// V4L2 backend. Both backend kinds go through V4L2; they differ in how
/// strictly the pixel format is negotiated.
#[derive(Debug, Clone, Copy)]
pub struct V4l2Backend {
    kind: BackendKind,
}

impl V4l2Backend {
    /// Create a backend of the given kind.
    #[must_use]
    pub const fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    fn open_index(index: u32) -> Result<(Device, DeviceCapabilities)> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("/dev/video{index}: {err}")))?;
        let capabilities = query_capabilities(&device)?;
        Ok((device, capabilities))
    }

    fn open_auto() -> Result<(Device, DeviceCapabilities)> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(v4l::context::Node::index);

        for node in nodes {
            let Ok(device) = Device::with_path(node.path()) else {
                continue;
            };
            match query_capabilities(&device) {
                Ok(capabilities) if capabilities.can_capture => {
                    debug!(
                        path = %node.path().display(),
                        card = %capabilities.card,
                        "auto-detected capture device"
                    );
                    return Ok((device, capabilities));
                }
                _ => continue,
            }
        }

        Err(CameraError::DeviceNotFound(DeviceSelector::Auto))
    }
}

impl CaptureBackend for V4l2Backend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, selector: DeviceSelector) -> Result<Box<dyn CaptureHandle>> {
        let (device, capabilities) = match selector {
            DeviceSelector::Index(index) => Self::open_index(index)?,
            DeviceSelector::Auto => Self::open_auto()?,
        };

        if !capabilities.can_capture {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} ({}) cannot capture video",
                capabilities.card, capabilities.driver
            )));
        }

        Ok(Box::new(V4l2Handle {
            stream: None,
            device: Some(device),
            kind: self.kind,
            capabilities,
            format: None,
            buffer_count: 1,
            read_timeout: CaptureConfig::default().read_timeout,
        }))
    }
}

fn query_capabilities(device: &Device) -> Result<DeviceCapabilities> {
    let caps = device
        .query_caps()
        .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

    Ok(DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
    })
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

/// An opened V4L2 device with a lazily started mmap stream.
pub struct V4l2Handle {
    // Declared before `device` so the stream is torn down first.
    stream: Option<Stream<'static>>,
    device: Option<Device>,
    kind: BackendKind,
    capabilities: DeviceCapabilities,
    format: Option<Format>,
    buffer_count: u32,
    read_timeout: Duration,
}

impl V4l2Handle {
    fn device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(CameraError::NotOpened)
    }

    fn ensure_stream(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.device()?;
        if self.format.is_none() {
            let fmt = device.format()?;
            self.format = Some(to_format(&fmt));
        }

        let device = self.device()?;
        let mut stream = Stream::with_buffers(device, Type::VideoCapture, self.buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        stream.set_timeout(self.read_timeout);
        self.stream = Some(stream);
        Ok(())
    }
}

impl CaptureHandle for V4l2Handle {
    fn is_opened(&self) -> bool {
        self.device.is_some()
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn configure(&mut self, config: &CaptureConfig) -> Result<Format> {
        self.buffer_count = config.buffer_count.max(1);
        self.read_timeout = config.read_timeout;

        let requested_fourcc = match self.kind {
            BackendKind::V4l2 => FourCC::YUYV,
            BackendKind::Any => FourCC::MJPG,
        };

        let device = self.device()?;
        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = requested_fourcc.into();

        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let actual = to_format(&fmt);

        let acceptable = match self.kind {
            BackendKind::V4l2 => actual.fourcc == FourCC::YUYV,
            BackendKind::Any => DECODABLE.contains(&actual.fourcc),
        };
        if !acceptable {
            return Err(CameraError::FormatNotSupported(actual));
        }

        device
            .set_params(&Parameters::with_fps(config.fps))
            .map_err(|err| CameraError::StreamError(format!("set fps: {err}")))?;

        self.format = Some(actual.clone());
        Ok(actual)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        self.ensure_stream()?;

        let format = self.format.clone().ok_or(CameraError::NotOpened)?;
        let stream = self.stream.as_mut().ok_or(CameraError::NotOpened)?;
        let (buf, meta) = stream
            .next()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let used = buf.get(..meta.bytesused as usize).unwrap_or(buf);

        Ok(Frame {
            data: used.to_vec(),
            format,
        })
    }

    fn release(&mut self) {
        self.stream = None;
        if self.device.take().is_some() {
            debug!(card = %self.capabilities.card, backend = %self.kind, "released V4L2 device");
        }
    }
}

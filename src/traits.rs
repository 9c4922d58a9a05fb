//! Core traits and types for the camera capture abstraction.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use image::RgbImage;

use crate::camera::ProbeFailure;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a packed format specification, deriving stride and size from
    /// the pixel format. Compressed formats report a stride and size of 0.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let bytes_per_pixel = match fourcc.0 {
            [b'Y', b'U', b'Y', b'V'] => 2,
            [b'R', b'G', b'B', b'3'] => 3,
            _ => 0,
        };
        let stride = width * bytes_per_pixel;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
}

/// A raw frame as read from a capture handle.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Format the data is laid out in.
    pub format: Format,
}

impl Frame {
    /// Whether the frame carries no payload at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the raw payload into an RGB image.
    ///
    /// Supports YUYV (converted with BT.601), MJPG and RGB3.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let Format {
            width,
            height,
            fourcc,
            ..
        } = self.format;

        match fourcc {
            FourCC::YUYV => yuyv_to_rgb_image(&self.data, width, height),
            FourCC::MJPG => {
                image::load_from_memory_with_format(&self.data, image::ImageFormat::Jpeg)
                    .map(|img| img.to_rgb8())
                    .map_err(|err| CameraError::Decode(err.to_string()))
            }
            FourCC::RGB3 => {
                let expected = (width as usize) * (height as usize) * 3;
                let data = self.data.get(..expected).ok_or_else(|| {
                    CameraError::Decode(format!(
                        "RGB3 frame too small: {} < {expected}",
                        self.data.len()
                    ))
                })?;
                RgbImage::from_raw(width, height, data.to_vec())
                    .ok_or_else(|| CameraError::Decode("RGB3 buffer size mismatch".to_owned()))
            }
            other => Err(CameraError::Decode(format!("unsupported pixel format {other}"))),
        }
    }
}

/// Convert a packed YUYV buffer into an RGB image.
fn yuyv_to_rgb_image(data: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = (width as usize) * (height as usize) * 2;
    let data = data.get(..expected).ok_or_else(|| {
        CameraError::Decode(format!("YUYV frame too small: {} < {expected}", data.len()))
    })?;

    // [Y0 U Y1 V] -> two RGB pixels sharing U and V
    let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
    for chunk in data.chunks_exact(4) {
        if let [y0, u, y1, v] = *chunk {
            let (r, g, b) = yuv_to_rgb(y0, u, v);
            rgb.extend_from_slice(&[r, g, b]);
            let (r, g, b) = yuv_to_rgb(y1, u, v);
            rgb.extend_from_slice(&[r, g, b]);
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CameraError::Decode("YUYV frame has odd width".to_owned()))
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
///
/// # Arguments
///
/// * `y` - Luminance value (16-235 for studio range)
/// * `u` - Blue-difference chroma value (16-240)
/// * `v` - Red-difference chroma value (16-240)
///
/// # Returns
///
/// RGB tuple with values clamped to 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

/// Which capture device to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    /// A fixed device index (`/dev/video{n}` on Linux).
    Index(u32),
    /// The first capture-capable device found.
    Auto,
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Auto => f.write_str("-1"),
        }
    }
}

/// Error returned when a device selector cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid device selector {0:?}: expected an index, -1 or \"auto\"")]
pub struct ParseDeviceSelectorError(String);

impl FromStr for DeviceSelector {
    type Err = ParseDeviceSelectorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-1" || s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<u32>()
            .map(Self::Index)
            .map_err(|_| ParseDeviceSelectorError(s.to_owned()))
    }
}

/// Capture driver flavour used when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum BackendKind {
    /// Platform-native V4L2 capture with a fixed YUYV format.
    V4l2,
    /// Generic fallback accepting whatever format the driver negotiates.
    Any,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4l2 => f.write_str("V4L2"),
            Self::Any => f.write_str("ANY"),
        }
    }
}

/// Requested capture configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Target frame width in pixels.
    pub width: u32,
    /// Target frame height in pixels.
    pub height: u32,
    /// Target frame rate.
    pub fps: u32,
    /// Driver-side buffers; kept minimal to avoid serving stale frames.
    pub buffer_count: u32,
    /// Upper bound on a single blocking read.
    pub read_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            buffer_count: 1,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Device with given selector was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceSelector),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// The handle is closed.
    #[error("Device is not opened")]
    NotOpened,
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// The driver returned a frame without data.
    #[error("Empty frame")]
    EmptyFrame,
    /// The frame payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
    /// No probed device/backend combination produced a frame.
    #[error("No working camera found ({} combinations tried)", .0.len())]
    Unavailable(Vec<ProbeFailure>),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// A capture driver that can open devices.
pub trait CaptureBackend: Send + Sync {
    /// The backend flavour, used for probing order and diagnostics.
    fn kind(&self) -> BackendKind;

    /// Open the selected device.
    fn open(&self, device: DeviceSelector) -> Result<Box<dyn CaptureHandle>>;
}

/// An opened capture device.
pub trait CaptureHandle: Send {
    /// Whether the handle still holds an open device.
    fn is_opened(&self) -> bool;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Apply size, frame rate and buffering. Returns the format the driver
    /// actually settled on.
    fn configure(&mut self, config: &CaptureConfig) -> Result<Format>;

    /// Read the next frame, blocking for at most the configured read timeout.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Close the device. Calling this on a closed handle does nothing.
    fn release(&mut self);
}

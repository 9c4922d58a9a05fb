//! Pi-Cam-Stream: on-demand MJPEG streaming from a V4L2 camera
//!
//! The camera is opened only while a client has asked for streaming. A
//! background capture loop keeps the newest decoded frame in a shared
//! buffer, and every `/stream` viewer encodes from that buffer on its own.
//! Capture backends sit behind traits so the whole lifecycle can be tested
//! with mock devices.

pub mod camera;
pub mod capture;
pub mod config;
pub mod device;
pub mod frame_buffer;
pub mod mjpeg;
pub mod server;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use camera::{ActiveCamera, CameraDevice};
pub use config::Config;
pub use device::V4l2Backend;
pub use frame_buffer::{CapturedFrame, FrameBuffer};
pub use mjpeg::StreamEncoder;
pub use server::router;
pub use session::{Session, SessionSettings, SessionState, StatusReport};
pub use traits::{
    BackendKind, CameraError, CaptureBackend, CaptureConfig, CaptureHandle, DeviceCapabilities,
    DeviceSelector, Format, FourCC, Frame,
};

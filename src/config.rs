//! Command-line and environment configuration.

use std::time::Duration;

use clap::Parser;

use crate::capture::CaptureSettings;
use crate::mjpeg::StreamSettings;
use crate::session::SessionSettings;
use crate::traits::{BackendKind, CaptureConfig, DeviceSelector};

/// Camera streaming server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "pi-cam-stream")]
#[command(about = "Serve a V4L2 camera as an on-demand MJPEG stream")]
#[command(version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "CAMSTREAM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "CAMSTREAM_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Device indices to probe in order (-1 = auto-detect)
    #[arg(
        long = "device",
        env = "CAMSTREAM_DEVICES",
        value_delimiter = ',',
        allow_hyphen_values = true,
        default_values = ["0", "2", "-1"]
    )]
    pub devices: Vec<DeviceSelector>,

    /// Backends to try for each device, in order
    #[arg(
        long = "backend",
        env = "CAMSTREAM_BACKENDS",
        value_enum,
        value_delimiter = ',',
        default_values = ["v4l2", "any"]
    )]
    pub backends: Vec<BackendKind>,

    /// Requested frame width
    #[arg(long, env = "CAMSTREAM_WIDTH", default_value_t = 640)]
    pub width: u32,

    /// Requested frame height
    #[arg(long, env = "CAMSTREAM_HEIGHT", default_value_t = 480)]
    pub height: u32,

    /// Requested frame rate
    #[arg(long, env = "CAMSTREAM_FPS", default_value_t = 30)]
    pub fps: u32,

    /// Driver buffers; 1 keeps latency lowest
    #[arg(long, env = "CAMSTREAM_BUFFERS", default_value_t = 1)]
    pub buffer_count: u32,

    /// JPEG quality of streamed frames
    #[arg(
        long,
        env = "CAMSTREAM_JPEG_QUALITY",
        default_value_t = 80,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub jpeg_quality: u8,

    /// Maximum time a single frame read may block, in milliseconds
    #[arg(long, env = "CAMSTREAM_READ_TIMEOUT_MS", default_value_t = 1000)]
    pub read_timeout_ms: u64,

    /// How long stop-stream waits for the capture loop, in milliseconds
    #[arg(long, env = "CAMSTREAM_STOP_TIMEOUT_MS", default_value_t = 2000)]
    pub stop_timeout_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(
        long,
        env = "CAMSTREAM_LOG",
        default_value = "pi_cam_stream=info,tower_http=info"
    )]
    pub log_filter: String,
}

impl Config {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session settings derived from this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            devices: self.devices.clone(),
            capture: CaptureConfig {
                width: self.width,
                height: self.height,
                fps: self.fps,
                buffer_count: self.buffer_count,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
            },
            capture_loop: CaptureSettings::default(),
            stream: StreamSettings {
                jpeg_quality: self.jpeg_quality,
                ..StreamSettings::default()
            },
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

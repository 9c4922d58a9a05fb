//! Streaming session lifecycle.
//!
//! [`Session`] is the only place camera and capture-loop lifecycle change.
//! Every transition runs under one lock for its full check-and-mutate
//! sequence, so concurrent `start` calls collapse to a single camera open
//! and a `stop` never releases a device a `start` is still handing to its
//! capture loop. The frame buffer has its own lock and is never touched
//! while waiting on the lifecycle lock.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::camera::{ActiveCamera, CameraDevice};
use crate::capture::{CaptureError, CaptureSettings, CaptureStats, CaptureTask};
use crate::frame_buffer::FrameBuffer;
use crate::mjpeg::{StreamEncoder, StreamSettings};
use crate::traits::{CameraError, CaptureBackend, CaptureConfig, DeviceSelector};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    /// No camera held, no capture loop.
    Idle = 0,
    /// Probing for a camera.
    Starting = 1,
    /// Capture loop running.
    Streaming = 2,
    /// Capture loop shutting down.
    Stopping = 3,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Streaming,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Everything needed to run sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Devices to probe, in order.
    pub devices: Vec<DeviceSelector>,
    /// Requested capture format.
    pub capture: CaptureConfig,
    /// Capture loop timing.
    pub capture_loop: CaptureSettings,
    /// Encoder settings handed to each viewer.
    pub stream: StreamSettings,
    /// How long `stop` waits for the capture loop to exit.
    pub stop_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            devices: vec![
                DeviceSelector::Index(0),
                DeviceSelector::Index(2),
                DeviceSelector::Auto,
            ],
            capture: CaptureConfig::default(),
            capture_loop: CaptureSettings::default(),
            stream: StreamSettings::default(),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A camera was opened and the capture loop started.
    Started(ActiveCamera),
    /// The session was already streaming; nothing changed.
    AlreadyStreaming,
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The capture loop exited and the camera was released.
    Stopped,
    /// The session was already idle; nothing changed.
    AlreadyStopped,
}

/// Error type for session transitions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No probed camera worked.
    #[error("Failed to initialize camera: {0}")]
    CameraUnavailable(#[source] CameraError),
    /// The capture loop could not be started or stopped.
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Diagnostic snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Lifecycle state.
    pub state: SessionState,
    /// Whether the capture loop is running.
    pub streaming: bool,
    /// Whether a camera handle is held.
    pub camera_initialized: bool,
    /// Whether a frame is available to viewers.
    pub has_frame: bool,
    /// The open camera, if any.
    pub device: Option<ActiveCamera>,
    /// Frames captured by the current loop.
    pub frames_captured: u64,
    /// Failed reads in the current loop.
    pub read_failures: u64,
    /// Last measured capture rate.
    pub capture_fps: f64,
    /// Capture time of the newest frame.
    pub last_frame_at: Option<DateTime<Utc>>,
}

struct Lifecycle {
    device: CameraDevice,
    task: Option<CaptureTask>,
}

/// What status readers may see without taking the lifecycle lock.
#[derive(Default)]
struct Published {
    device: Option<ActiveCamera>,
    stats: Option<Arc<CaptureStats>>,
}

/// The streaming session controller.
pub struct Session {
    lifecycle: Mutex<Lifecycle>,
    state: AtomicU8,
    published: RwLock<Published>,
    frames: Arc<FrameBuffer>,
    settings: SessionSettings,
}

impl Session {
    /// Create an idle session probing `backends` in order.
    pub fn new(backends: Vec<Arc<dyn CaptureBackend>>, settings: SessionSettings) -> Self {
        let device = CameraDevice::new(
            backends,
            settings.devices.clone(),
            settings.capture.clone(),
        );
        Self {
            lifecycle: Mutex::new(Lifecycle { device, task: None }),
            state: AtomicU8::new(SessionState::Idle as u8),
            published: RwLock::new(Published::default()),
            frames: Arc::new(FrameBuffer::new()),
            settings,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// The shared frame buffer.
    pub const fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    /// Open a camera and start capturing, unless already streaming.
    pub fn start(&self) -> Result<StartOutcome, SessionError> {
        let mut lifecycle = self.lifecycle.lock();

        match self.state() {
            SessionState::Streaming => {
                info!("camera already streaming");
                return Ok(StartOutcome::AlreadyStreaming);
            }
            // A previous stop timed out; the device stays closed to new
            // probes until its loop has exited
            SessionState::Stopping => self.finish_stop(&mut lifecycle)?,
            SessionState::Idle | SessionState::Starting => {}
        }

        self.set_state(SessionState::Starting);
        info!("starting camera stream");

        let active = match lifecycle.device.initialize() {
            Ok(active) => active,
            Err(err) => {
                error!(error = %err, "failed to initialize camera");
                self.set_state(SessionState::Idle);
                return Err(SessionError::CameraUnavailable(err));
            }
        };

        let Some(handle) = lifecycle.device.shared_handle() else {
            lifecycle.device.release();
            self.set_state(SessionState::Idle);
            return Err(SessionError::CameraUnavailable(CameraError::NotOpened));
        };

        self.frames.clear();
        let task = match CaptureTask::spawn(
            handle,
            Arc::clone(&self.frames),
            self.settings.capture_loop.clone(),
        ) {
            Ok(task) => task,
            Err(err) => {
                error!(error = %err, "failed to start capture loop");
                lifecycle.device.release();
                self.set_state(SessionState::Idle);
                return Err(err.into());
            }
        };

        *self.published.write() = Published {
            device: Some(active.clone()),
            stats: Some(Arc::clone(task.stats())),
        };
        lifecycle.task = Some(task);
        self.set_state(SessionState::Streaming);
        info!(index = %active.index, backend = %active.backend, "camera stream started");

        Ok(StartOutcome::Started(active))
    }

    /// Stop capturing and release the camera, unless already idle.
    ///
    /// Returns only after the capture loop has exited and the camera has
    /// been released. If the loop outlives `stop_timeout` the session stays
    /// in Stopping and a later `stop` or `start` retries the join.
    pub fn stop(&self) -> Result<StopOutcome, SessionError> {
        let mut lifecycle = self.lifecycle.lock();

        if self.state() == SessionState::Idle {
            info!("camera already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }

        self.set_state(SessionState::Stopping);
        info!("stopping camera stream");
        if let Some(task) = &lifecycle.task {
            task.signal();
        }
        self.frames.clear();

        self.finish_stop(&mut lifecycle)?;
        info!("camera stream stopped");

        Ok(StopOutcome::Stopped)
    }

    /// Join the signalled capture loop, then release the camera and enter
    /// Idle. On timeout the session is left in Stopping with the camera held.
    fn finish_stop(&self, lifecycle: &mut Lifecycle) -> Result<(), SessionError> {
        if let Some(task) = lifecycle.task.as_mut() {
            if let Err(err) = task.stop(self.settings.stop_timeout) {
                warn!(error = %err, "capture loop still running, camera kept open");
                return Err(err.into());
            }
        }
        lifecycle.task = None;
        lifecycle.device.release();
        self.frames.clear();
        *self.published.write() = Published::default();
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Stop on process exit, logging instead of returning errors.
    pub fn shutdown(&self) {
        match self.stop() {
            Ok(StopOutcome::Stopped) => info!("camera released on shutdown"),
            Ok(StopOutcome::AlreadyStopped) => {}
            Err(err) => error!(error = %err, "failed to stop camera on shutdown"),
        }
    }

    /// Whether viewers currently get frames.
    pub fn is_frame_flowing(&self) -> bool {
        self.state() == SessionState::Streaming && self.frames.has_frame()
    }

    /// A fresh encoder for one viewer, or `None` when not streaming.
    pub fn encoder(&self) -> Option<StreamEncoder> {
        (self.state() == SessionState::Streaming)
            .then(|| StreamEncoder::new(Arc::clone(&self.frames), self.settings.stream.clone()))
    }

    /// Diagnostic snapshot. Never waits on a lifecycle transition.
    pub fn status(&self) -> StatusReport {
        let state = self.state();
        let published = self.published.read();
        let latest = self.frames.latest();
        let stats = published.stats.as_deref();

        StatusReport {
            state,
            streaming: state == SessionState::Streaming,
            camera_initialized: published.device.is_some(),
            has_frame: latest.is_some(),
            device: published.device.clone(),
            frames_captured: stats.map_or(0, CaptureStats::frames_captured),
            read_failures: stats.map_or(0, CaptureStats::read_failures),
            capture_fps: stats.map_or(0.0, CaptureStats::capture_fps),
            last_frame_at: latest.map(|frame| frame.captured_at),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

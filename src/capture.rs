//! Background capture loop feeding the frame buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::camera::SharedHandle;
use crate::frame_buffer::FrameBuffer;
use crate::traits::CameraError;

/// Timing of the capture loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Pause after a failed read before trying again.
    pub failure_backoff: Duration,
    /// How often the observed capture rate is logged.
    pub rate_log_interval: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            failure_backoff: Duration::from_millis(100),
            rate_log_interval: Duration::from_secs(5),
        }
    }
}

/// Counters updated by the capture loop.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    failures: AtomicU64,
    fps_bits: AtomicU64,
}

impl CaptureStats {
    /// Frames published so far.
    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Reads that failed and were retried.
    pub fn read_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Capture rate measured over the last completed interval.
    pub fn capture_fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }
}

/// Frames-per-second over fixed windows.
#[derive(Debug)]
pub struct RateMeter {
    window: Duration,
    started: Instant,
    frames: u64,
}

impl RateMeter {
    /// Start measuring at `now`.
    pub const fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            started: now,
            frames: 0,
        }
    }

    /// Count one frame. Returns the rate when a window has elapsed.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }
        let rate = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.started = now;
        Some(rate)
    }
}

/// Error type for capture task control.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The loop did not observe the stop signal in time.
    #[error("capture loop did not stop within {0:?}")]
    StopTimeout(Duration),
    /// The capture thread could not be started.
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The capture thread panicked.
    #[error("capture thread panicked")]
    Panicked,
}

struct CaptureLoop {
    handle: SharedHandle,
    frames: Arc<FrameBuffer>,
    settings: CaptureSettings,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureLoop {
    fn run(&self) {
        info!("capture loop started");
        let mut meter = RateMeter::new(self.settings.rate_log_interval, Instant::now());

        while !self.stop.load(Ordering::Acquire) {
            match self.capture_one() {
                Ok(_) => {
                    self.stats.frames.fetch_add(1, Ordering::Relaxed);
                    if let Some(fps) = meter.record(Instant::now()) {
                        self.stats.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
                        info!(fps = format_args!("{fps:.2}"), "capture rate");
                    }
                }
                Err(err) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "failed to capture frame");
                    thread::sleep(self.settings.failure_backoff);
                }
            }
        }

        info!(frames = self.stats.frames_captured(), "capture loop stopped");
    }

    fn capture_one(&self) -> Result<u64, CameraError> {
        let frame = {
            let mut handle = self.handle.lock();
            if !handle.is_opened() {
                return Err(CameraError::NotOpened);
            }
            handle.read_frame()?
        };
        if frame.is_empty() {
            return Err(CameraError::EmptyFrame);
        }

        let image = frame.to_rgb_image()?;
        Ok(self.frames.publish(image, Utc::now()))
    }
}

/// A running capture loop on its own thread.
pub struct CaptureTask {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    exited: mpsc::Receiver<()>,
    stats: Arc<CaptureStats>,
}

impl CaptureTask {
    /// Start reading from `handle` into `frames`.
    pub fn spawn(
        handle: SharedHandle,
        frames: Arc<FrameBuffer>,
        settings: CaptureSettings,
    ) -> Result<Self, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CaptureStats::default());
        let (exit_tx, exited) = mpsc::channel::<()>();

        let capture = CaptureLoop {
            handle,
            frames,
            settings,
            stop: Arc::clone(&stop),
            stats: Arc::clone(&stats),
        };

        let thread = thread::Builder::new()
            .name("capture-loop".to_owned())
            .spawn(move || {
                // Dropped on exit, including unwinding, which wakes `stop`
                let _exit = exit_tx;
                capture.run();
            })
            .map_err(CaptureError::Spawn)?;

        Ok(Self {
            stop,
            thread: Some(thread),
            exited,
            stats,
        })
    }

    /// Counters of this task.
    pub const fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    /// Ask the loop to exit after its current iteration.
    pub fn signal(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Signal the loop and wait up to `timeout` for it to exit.
    ///
    /// On timeout the loop stays signalled and a later call waits again.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        self.signal();

        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                thread.join().map_err(|_| CaptureError::Panicked)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.thread = Some(thread);
                Err(CaptureError::StopTimeout(timeout))
            }
        }
    }

    /// Whether the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CaptureTask {
    fn drop(&mut self) {
        self.signal();
    }
}

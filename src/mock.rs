//! Mock capture backend for testing without hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::camera::ProbeCandidate;
use crate::traits::{
    BackendKind, CameraError, CaptureBackend, CaptureConfig, CaptureHandle, DeviceCapabilities,
    DeviceSelector, Format, FourCC, Frame, Result,
};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// How a mock device behaves when opened through a [`MockBackend`].
#[derive(Debug, Clone, Copy)]
pub enum MockBehavior {
    /// `open` returns an error.
    FailOpen,
    /// `open` succeeds but the handle reports not opened.
    NotOpened,
    /// `configure` fails, reads work.
    ConfigureFails,
    /// Reads succeed with an empty payload.
    EmptyFrame,
    /// Reads fail.
    ReadError,
    /// Reads produce frames with the given pattern.
    Working(TestPattern),
    /// Every `fail_every`-th read after the first fails.
    Flaky {
        /// Pattern for successful reads.
        pattern: TestPattern,
        /// Failure period.
        fail_every: u32,
    },
    /// Reads succeed but each one blocks for the given time.
    Slow(Duration),
}

impl MockBehavior {
    /// A device delivering color bars.
    pub const fn working() -> Self {
        Self::Working(TestPattern::ColorBars)
    }
}

/// Shared record of what the mock backends did.
#[derive(Debug, Default)]
pub struct ProbeLog {
    attempts: Mutex<Vec<ProbeCandidate>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    reads: AtomicUsize,
}

impl ProbeLog {
    /// Create an empty log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every `open` call, in order.
    pub fn attempts(&self) -> Vec<ProbeCandidate> {
        self.attempts.lock().clone()
    }

    /// Handles currently open.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of handles ever open at once.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Total reads across all handles.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn opened(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock backend; devices without a configured behavior fail to open.
pub struct MockBackend {
    kind: BackendKind,
    behaviors: HashMap<DeviceSelector, MockBehavior>,
    log: Arc<ProbeLog>,
}

impl MockBackend {
    /// Create a backend of the given kind recording into `log`.
    pub fn new(kind: BackendKind, log: &Arc<ProbeLog>) -> Self {
        Self {
            kind,
            behaviors: HashMap::new(),
            log: Arc::clone(log),
        }
    }

    /// Set the behavior of one device.
    #[must_use]
    pub fn with(mut self, device: DeviceSelector, behavior: MockBehavior) -> Self {
        self.behaviors.insert(device, behavior);
        self
    }
}

impl CaptureBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, device: DeviceSelector) -> Result<Box<dyn CaptureHandle>> {
        self.log.attempts.lock().push(ProbeCandidate {
            device,
            backend: self.kind,
        });

        let behavior = self
            .behaviors
            .get(&device)
            .copied()
            .unwrap_or(MockBehavior::FailOpen);

        let opened = match behavior {
            MockBehavior::FailOpen => return Err(CameraError::DeviceNotFound(device)),
            MockBehavior::NotOpened => false,
            _ => true,
        };
        if opened {
            self.log.opened();
        }

        Ok(Box::new(MockHandle {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: format!("Mock Camera {device}"),
                can_capture: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            behavior,
            read_count: 0,
            opened,
            log: Arc::clone(&self.log),
        }))
    }
}

/// Mock capture handle.
pub struct MockHandle {
    capabilities: DeviceCapabilities,
    format: Format,
    behavior: MockBehavior,
    read_count: u32,
    opened: bool,
    log: Arc<ProbeLog>,
}

impl MockHandle {
    fn next_frame(&mut self, pattern: TestPattern) -> Frame {
        Frame {
            data: generate_test_frame(&self.format, pattern),
            format: self.format.clone(),
        }
    }
}

impl CaptureHandle for MockHandle {
    fn is_opened(&self) -> bool {
        self.opened
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn configure(&mut self, config: &CaptureConfig) -> Result<Format> {
        if matches!(self.behavior, MockBehavior::ConfigureFails) {
            return Err(CameraError::StreamError("mock configure failure".to_owned()));
        }
        self.format = Format::new(config.width, config.height, FourCC::YUYV);
        Ok(self.format.clone())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        self.log.reads.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            MockBehavior::FailOpen | MockBehavior::NotOpened => Err(CameraError::NotOpened),
            MockBehavior::ReadError => {
                Err(CameraError::StreamError("mock read failure".to_owned()))
            }
            MockBehavior::EmptyFrame => {
                let mut frame = self.next_frame(TestPattern::ColorBars);
                frame.data.clear();
                Ok(frame)
            }
            MockBehavior::ConfigureFails => Ok(self.next_frame(TestPattern::ColorBars)),
            MockBehavior::Working(pattern) => Ok(self.next_frame(pattern)),
            MockBehavior::Flaky {
                pattern,
                fail_every,
            } => {
                let attempt = self.read_count;
                self.read_count += 1;
                if attempt > 0 && attempt % fail_every.max(1) == 0 {
                    Err(CameraError::StreamError("mock intermittent failure".to_owned()))
                } else {
                    Ok(self.next_frame(pattern))
                }
            }
            MockBehavior::Slow(delay) => {
                std::thread::sleep(delay);
                Ok(self.next_frame(TestPattern::Gradient))
            }
        }
    }

    fn release(&mut self) {
        if self.opened {
            self.opened = false;
            self.log.closed();
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];
            let offset = ((y * width + x) * 2) as usize;
            write_pair(data, offset, y_val, u_val, v_val);
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;
            write_pair(data, offset, y_val, 128, 128);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for offset in (0..data.len()).step_by(4) {
        write_pair(data, offset, y, u, v);
    }
}

fn write_pair(data: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    if let Some(pair) = data.get_mut(offset..offset + 4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(behavior: MockBehavior) -> (Arc<ProbeLog>, Box<dyn CaptureHandle>) {
        let log = ProbeLog::new();
        let backend = MockBackend::new(BackendKind::V4l2, &log)
            .with(DeviceSelector::Index(0), behavior);
        let handle = backend
            .open(DeviceSelector::Index(0))
            .expect("open should succeed");
        (log, handle)
    }

    #[test]
    fn test_unknown_device_fails_open() {
        let log = ProbeLog::new();
        let backend = MockBackend::new(BackendKind::Any, &log);
        assert!(backend.open(DeviceSelector::Index(3)).is_err());
        assert_eq!(log.attempts().len(), 1);
        assert_eq!(log.live(), 0);
    }

    #[test]
    fn test_mock_handle_capture() {
        let (log, mut handle) = open(MockBehavior::working());
        assert!(handle.is_opened());
        assert_eq!(handle.capabilities().driver, "mock");

        let frame = handle.read_frame().expect("read should succeed");
        assert_eq!(frame.data.len(), 640 * 480 * 2);
        assert_eq!(frame.format.fourcc, FourCC::YUYV);

        handle.read_frame().expect("read should succeed");
        assert_eq!(log.reads(), 2);
    }

    #[test]
    fn test_mock_configure_changes_format() {
        let (_log, mut handle) = open(MockBehavior::working());
        let config = CaptureConfig {
            width: 320,
            height: 240,
            ..CaptureConfig::default()
        };
        let format = handle.configure(&config).expect("configure should succeed");
        assert_eq!((format.width, format.height), (320, 240));

        let frame = handle.read_frame().expect("read should succeed");
        assert_eq!(frame.data.len(), 320 * 240 * 2);
    }

    #[test]
    fn test_release_is_counted_once() {
        let (log, mut handle) = open(MockBehavior::working());
        assert_eq!(log.live(), 1);
        handle.release();
        handle.release();
        drop(handle);
        assert_eq!(log.live(), 0);
    }

    #[test]
    fn test_flaky_fails_periodically() {
        let (_log, mut handle) = open(MockBehavior::Flaky {
            pattern: TestPattern::Gradient,
            fail_every: 2,
        });
        assert!(handle.read_frame().is_ok());
        assert!(handle.read_frame().is_ok());
        assert!(handle.read_frame().is_err());
        assert!(handle.read_frame().is_ok());
        assert!(handle.read_frame().is_err());
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);
        assert_eq!(data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));
        assert_eq!(&data[..4], &[128, 64, 128, 192]);
    }
}

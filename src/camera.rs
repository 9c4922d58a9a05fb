//! Camera ownership and backend probing.
//!
//! A [`CameraDevice`] owns at most one opened [`CaptureHandle`]. Opening goes
//! through [`probe`], which walks an ordered list of device/backend
//! candidates and keeps the first one that actually delivers a frame.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::traits::{
    BackendKind, CameraError, CaptureBackend, CaptureConfig, CaptureHandle, DeviceSelector,
    Format, Result,
};

/// Handle shared between the device owner and the capture loop.
pub type SharedHandle = Arc<Mutex<Box<dyn CaptureHandle>>>;

/// One device/backend combination to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeCandidate {
    /// Device to open.
    pub device: DeviceSelector,
    /// Backend to open it with.
    pub backend: BackendKind,
}

impl fmt::Display for ProbeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.device, self.backend)
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone)]
pub struct ProbeFailure {
    /// The rejected candidate.
    pub candidate: ProbeCandidate,
    /// Human-readable reason.
    pub reason: String,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.reason)
    }
}

/// Outcome of a successful probe.
pub struct Probed {
    /// The winning combination.
    pub candidate: ProbeCandidate,
    /// The opened, configured handle that produced the test frame.
    pub handle: Box<dyn CaptureHandle>,
    /// Negotiated format, if configuration succeeded.
    pub format: Option<Format>,
    /// Reasons every earlier candidate was rejected.
    pub failures: Vec<ProbeFailure>,
}

/// Description of the camera currently held open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveCamera {
    /// Device index, `-1` for auto-detect.
    pub index: String,
    /// Backend name.
    pub backend: String,
    /// Card name reported by the driver.
    pub card: String,
    /// Negotiated width, if known.
    pub width: Option<u32>,
    /// Negotiated height, if known.
    pub height: Option<u32>,
}

/// Cross product of devices and backends, device-major.
pub fn candidates(devices: &[DeviceSelector], backends: &[BackendKind]) -> Vec<ProbeCandidate> {
    devices
        .iter()
        .flat_map(|&device| {
            backends
                .iter()
                .map(move |&backend| ProbeCandidate { device, backend })
        })
        .collect()
}

/// Try every candidate in order and return the first one whose handle both
/// opens and delivers a non-empty test frame.
///
/// Every handle opened for a rejected candidate is released before the next
/// candidate is tried. Configuration errors are logged and do not reject a
/// candidate on their own; only the test read decides.
pub fn probe(
    backends: &[Arc<dyn CaptureBackend>],
    devices: &[DeviceSelector],
    config: &CaptureConfig,
) -> std::result::Result<Probed, Vec<ProbeFailure>> {
    let kinds: Vec<BackendKind> = backends.iter().map(|backend| backend.kind()).collect();
    let mut failures = Vec::new();

    for candidate in candidates(devices, &kinds) {
        let Some(backend) = backends.iter().find(|b| b.kind() == candidate.backend) else {
            continue;
        };
        debug!(%candidate, "trying camera candidate");

        let mut handle = match backend.open(candidate.device) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%candidate, error = %err, "failed to open camera");
                failures.push(ProbeFailure {
                    candidate,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if !handle.is_opened() {
            handle.release();
            failures.push(ProbeFailure {
                candidate,
                reason: "device did not report opened".to_owned(),
            });
            continue;
        }

        let format = match handle.configure(config) {
            Ok(format) => Some(format),
            Err(err) => {
                warn!(
                    %candidate,
                    error = %err,
                    "failed to configure camera, trying a test read anyway"
                );
                None
            }
        };

        match handle.read_frame() {
            Ok(frame) if !frame.is_empty() => {
                info!(%candidate, card = %handle.capabilities().card, "camera initialized");
                return Ok(Probed {
                    candidate,
                    handle,
                    format,
                    failures,
                });
            }
            Ok(_) => {
                handle.release();
                failures.push(ProbeFailure {
                    candidate,
                    reason: CameraError::EmptyFrame.to_string(),
                });
            }
            Err(err) => {
                handle.release();
                warn!(%candidate, error = %err, "test read failed");
                failures.push(ProbeFailure {
                    candidate,
                    reason: err.to_string(),
                });
            }
        }
    }

    Err(failures)
}

/// Exclusive owner of the physical capture handle.
pub struct CameraDevice {
    backends: Vec<Arc<dyn CaptureBackend>>,
    devices: Vec<DeviceSelector>,
    config: CaptureConfig,
    handle: Option<SharedHandle>,
    active: Option<ActiveCamera>,
}

impl CameraDevice {
    /// Create a closed device that will probe `devices` x `backends`.
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn CaptureBackend>>,
        devices: Vec<DeviceSelector>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            backends,
            devices,
            config,
            handle: None,
            active: None,
        }
    }

    /// Probe for a working camera, replacing any handle already held.
    pub fn initialize(&mut self) -> Result<ActiveCamera> {
        self.release();

        match probe(&self.backends, &self.devices, &self.config) {
            Ok(probed) => {
                let active = ActiveCamera {
                    index: probed.candidate.device.to_string(),
                    backend: probed.candidate.backend.to_string(),
                    card: probed.handle.capabilities().card.clone(),
                    width: probed.format.as_ref().map(|f| f.width),
                    height: probed.format.as_ref().map(|f| f.height),
                };
                self.handle = Some(Arc::new(Mutex::new(probed.handle)));
                self.active = Some(active.clone());
                Ok(active)
            }
            Err(failures) => {
                for failure in &failures {
                    debug!(%failure, "candidate rejected");
                }
                Err(CameraError::Unavailable(failures))
            }
        }
    }

    /// Close the held handle, if any.
    pub fn release(&mut self) {
        self.active = None;
        if let Some(handle) = self.handle.take() {
            handle.lock().release();
            info!("camera released");
        }
    }

    /// Whether a handle is currently held open.
    pub fn is_open(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.lock().is_opened())
    }

    /// The camera currently held, if any.
    pub const fn active(&self) -> Option<&ActiveCamera> {
        self.active.as_ref()
    }

    /// The held handle, for the capture loop.
    pub fn shared_handle(&self) -> Option<SharedHandle> {
        self.handle.clone()
    }
}

impl Drop for CameraDevice {
    fn drop(&mut self) {
        self.release();
    }
}

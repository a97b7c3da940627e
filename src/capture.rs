//! Capture hand-off: camera frame → Image Store.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use log::{info, warn};

use crate::adapters::image_store::{ImageStore, ImageStoreError};
use crate::app::ports::{CaptureError, CapturePort, Volume};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFailure {
    Camera(CaptureError),
    Store(ImageStoreError),
}

impl fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera(e) => write!(f, "camera: {}", e),
            Self::Store(e) => write!(f, "store: {}", e),
        }
    }
}

impl std::error::Error for CaptureFailure {}

/// Take one frame and store it.  Returns the file number used.
///
/// The frame is returned to the driver before this function returns,
/// whether or not the write succeeded.
pub fn capture_once<C: CapturePort, V: Volume>(
    camera: &mut C,
    store: &ImageStore<V>,
) -> Result<u32, CaptureFailure> {
    let frame = camera.capture().map_err(CaptureFailure::Camera)?;
    store.write_image(frame.as_ref()).map_err(CaptureFailure::Store)
}

/// Running totals for the capture task.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CaptureStats {
    pub saved: u32,
    pub dropped: u32,
    pub last_saved: Option<u32>,
}

impl CaptureStats {
    pub fn record(&mut self, result: &Result<u32, CaptureFailure>) {
        match result {
            Ok(n) => {
                self.saved += 1;
                self.last_saved = Some(*n);
            }
            Err(_) => self.dropped += 1,
        }
    }
}

/// Capture every `interval` until `stop` is set.
pub fn capture_loop<C: CapturePort, V: Volume>(
    camera: &mut C,
    store: &ImageStore<V>,
    interval: Duration,
    stop: &AtomicBool,
) -> CaptureStats {
    let mut stats = CaptureStats::default();
    while !stop.load(Ordering::Acquire) {
        let result = capture_once(camera, store);
        if let Err(e) = &result {
            warn!("Camera: frame dropped: {}", e);
        }
        stats.record(&result);
        std::thread::sleep(interval);
    }
    match serde_json::to_string(&stats) {
        Ok(json) => info!("Camera: capture stopped {}", json),
        Err(_) => info!(
            "Camera: capture stopped ({} saved, {} dropped)",
            stats.saved, stats.dropped
        ),
    }
    stats
}

//! Unified error taxonomy for the trail camera firmware.
//!
//! Each component keeps its own typed error; this enum is the common
//! vocabulary they all convert into, so the boot sequence and the web layer
//! can report failures uniformly.  All variants are `Copy`.

use core::fmt;

use crate::adapters::image_store::ImageStoreError;
use crate::adapters::nvs::StorageError;
use crate::adapters::settings::SettingsError;
use crate::adapters::wifi::ConnectivityError;
use crate::app::ports::{CaptureError, NvsError, VolumeError, WifiDriverError};
use crate::capture::CaptureFailure;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A component was used before its initialisation completed.
    NotInitialized,
    /// A requested record or file does not exist.
    NotFound,
    /// A stored value does not fit the destination.
    BufferTooSmall { required: usize },
    /// Storage, filesystem or driver failure.
    Io(IoSource),
    /// A shared resource could not be acquired in time.
    Busy,
    /// An operation did not complete within its bound.
    Timeout,
    /// The WiFi link could not be established.
    ConnectFailed,
    /// A task or queue could not be allocated.
    ResourceExhausted,
    /// Fewer bytes than expected reached the medium.
    PartialWrite { written: usize, expected: usize },
    /// A caller-supplied value was rejected.
    InvalidInput(&'static str),
}

/// Subsystem an [`Error::Io`] came from, with its driver code where known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSource {
    Nvs(NvsError),
    Volume(VolumeError),
    Wifi(WifiDriverError),
    Camera(CaptureError),
}

impl fmt::Display for IoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvs(e) => write!(f, "NVS: {e}"),
            Self::Volume(e) => write!(f, "SD card: {e}"),
            Self::Wifi(e) => write!(f, "WiFi: {e}"),
            Self::Camera(e) => write!(f, "camera: {e}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not initialised"),
            Self::NotFound => write!(f, "not found"),
            Self::BufferTooSmall { required } => {
                write!(f, "buffer too small ({required} bytes required)")
            }
            Self::Io(src) => write!(f, "I/O: {src}"),
            Self::Busy => write!(f, "busy"),
            Self::Timeout => write!(f, "timed out"),
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::ResourceExhausted => write!(f, "resources exhausted"),
            Self::PartialWrite { written, expected } => {
                write!(f, "partial write ({written} of {expected} bytes)")
            }
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotInitialized => Self::NotInitialized,
            StorageError::NotFound => Self::NotFound,
            StorageError::BufferTooSmall { required } => Self::BufferTooSmall { required },
            StorageError::InvalidName => Self::InvalidInput("namespace or key name"),
            StorageError::Io(e) => Self::Io(IoSource::Nvs(e)),
        }
    }
}

impl From<ImageStoreError> for Error {
    fn from(e: ImageStoreError) -> Self {
        match e {
            ImageStoreError::NotMounted | ImageStoreError::NotRecovered => Self::NotInitialized,
            ImageStoreError::Busy => Self::Busy,
            ImageStoreError::PartialWrite { written, expected } => {
                Self::PartialWrite { written, expected }
            }
            ImageStoreError::SequenceExhausted => Self::ResourceExhausted,
            ImageStoreError::Io(e) => Self::Io(IoSource::Volume(e)),
        }
    }
}

impl From<ConnectivityError> for Error {
    fn from(e: ConnectivityError) -> Self {
        match e {
            ConnectivityError::NotInitialized => Self::NotInitialized,
            ConnectivityError::Credentials(e) => e.into(),
            ConnectivityError::Driver(e) => Self::Io(IoSource::Wifi(e)),
            ConnectivityError::ResourceExhausted => Self::ResourceExhausted,
            ConnectivityError::ConnectFailed => Self::ConnectFailed,
            ConnectivityError::Timeout => Self::Timeout,
        }
    }
}

impl From<SettingsError> for Error {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Storage(e) => e.into(),
            SettingsError::ValidationFailed(msg) => Self::InvalidInput(msg),
        }
    }
}

impl From<CaptureError> for Error {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::NotInitialized => Self::NotInitialized,
            other => Self::Io(IoSource::Camera(other)),
        }
    }
}

impl From<CaptureFailure> for Error {
    fn from(e: CaptureFailure) -> Self {
        match e {
            CaptureFailure::Camera(e) => e.into(),
            CaptureFailure::Store(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

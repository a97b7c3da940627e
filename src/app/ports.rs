//! Port traits: the hexagonal boundary between firmware logic and the platform.
//!
//! ```text
//!   Platform driver ──▶ Port trait ──▶ Kvs / ImageStore / ConnectivityManager
//! ```
//!
//! Each port has an ESP-IDF implementation and a host simulation used by
//! the test suite.  The core components consume them via generics, so the
//! retry, numbering and persistence rules never touch hardware directly.
//!
//! All port errors are typed and `Copy`; callers must handle every variant
//! explicitly.

use core::fmt;

use crate::adapters::wifi::LinkNotifier;
use crate::config::{SdCardConfig, WifiCredentials};

// ───────────────────────────────────────────────────────────────
// NVS backend port (KVS ↔ flash)
// ───────────────────────────────────────────────────────────────

/// Opaque handle for an open NVS session.
pub type NvsHandle = u32;

/// Access mode requested when opening a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Raw namespaced key/value flash interface.
///
/// Mirrors the shape of the ESP-IDF `nvs_*` API: handles are opened per
/// namespace, values are staged with `set_*` and become durable only after
/// [`commit`](NvsBackend::commit) returns `Ok`.  A power loss between a
/// `set_*` and the commit must leave the previous value intact.
///
/// Implementations must be callable from several tasks at once; every
/// handle is used by exactly one caller.
pub trait NvsBackend: Send + Sync {
    /// Initialise the flash partition.
    fn flash_init(&self) -> Result<(), NvsError>;

    /// Erase the whole partition (recovery after a layout/version mismatch).
    fn flash_erase(&self) -> Result<(), NvsError>;

    /// Open `namespace`.  Read-only opens of a namespace that was never
    /// written fail with [`NvsError::NotFound`].
    fn open(&self, namespace: &str, mode: OpenMode) -> Result<NvsHandle, NvsError>;

    /// Release a handle.  Uncommitted staged writes are discarded.
    fn close(&self, handle: NvsHandle);

    fn set_u32(&self, handle: NvsHandle, key: &str, value: u32) -> Result<(), NvsError>;

    fn set_str(&self, handle: NvsHandle, key: &str, value: &str) -> Result<(), NvsError>;

    fn get_u32(&self, handle: NvsHandle, key: &str) -> Result<u32, NvsError>;

    /// Copy the stored string into `buf` and return its byte length.
    /// Fails with [`NvsError::InvalidLength`] when `buf` is too small.
    fn get_str(&self, handle: NvsHandle, key: &str, buf: &mut [u8]) -> Result<usize, NvsError>;

    /// Stage removal of `key`.  [`NvsError::NotFound`] if it does not exist.
    fn erase_key(&self, handle: NvsHandle, key: &str) -> Result<(), NvsError>;

    /// Stage removal of every key in the handle's namespace.
    fn erase_all(&self, handle: NvsHandle) -> Result<(), NvsError>;

    /// Make all staged changes on `handle` durable.
    fn commit(&self, handle: NvsHandle) -> Result<(), NvsError>;
}

// ───────────────────────────────────────────────────────────────
// Volume port (ImageStore ↔ SD card filesystem)
// ───────────────────────────────────────────────────────────────

/// One entry in the volume's root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
}

/// A removable block device carrying a FAT filesystem.
///
/// Only the [`ImageStore`](crate::adapters::image_store::ImageStore) holds a
/// `Volume`, and only while holding its mutex.
pub trait Volume: Send {
    /// Mount the medium described by `config`.
    ///
    /// With `format_if_unformatted == false` an unformatted medium is
    /// reported as [`VolumeError::Unformatted`]; with `true` it is formatted
    /// and then mounted.
    fn mount(&mut self, config: &SdCardConfig, format_if_unformatted: bool)
    -> Result<(), VolumeError>;

    fn unmount(&mut self) -> Result<(), VolumeError>;

    /// List the root directory.
    fn list_root(&self) -> Result<Vec<DirEntry>, VolumeError>;

    /// Create (or truncate) `name` in the root directory and write `data`.
    ///
    /// Returns the number of bytes that actually reached the medium, which
    /// may be less than `data.len()` if the card fills up or drops out.
    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<usize, VolumeError>;
}

// ───────────────────────────────────────────────────────────────
// WiFi driver port (ConnectivityManager ↔ radio)
// ───────────────────────────────────────────────────────────────

/// Station-mode WiFi radio.
///
/// Asynchronous platform notifications (station started, disconnected,
/// address acquired) are delivered through the [`LinkNotifier`] handed to
/// [`init`](WifiDriver::init).  Every other call is a plain request; its
/// outcome arrives later as a notification.
pub trait WifiDriver: Send + Sync + 'static {
    /// Bring up the driver in station role and register notification handlers.
    fn init(&self, notifier: LinkNotifier) -> Result<(), WifiDriverError>;

    /// Apply station credentials for the next association.
    fn configure(&self, credentials: &WifiCredentials) -> Result<(), WifiDriverError>;

    /// Start the station.  The platform answers with `StaStarted`.
    fn start(&self) -> Result<(), WifiDriverError>;

    /// Request association with the configured AP.
    fn connect(&self) -> Result<(), WifiDriverError>;

    /// Stop the station.
    fn stop(&self) -> Result<(), WifiDriverError>;

    /// Unregister notification handlers and release driver resources.
    fn deinit(&self);

    /// Whether the radio is currently in station mode.
    fn is_station(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Capture port (camera sensor → ImageStore)
// ───────────────────────────────────────────────────────────────

/// Source of encoded frames.  The firmware never interprets frame content.
pub trait CapturePort {
    /// A captured frame.  Borrowed from the driver; returned on drop.
    type Frame<'a>: AsRef<[u8]>
    where
        Self: 'a;

    fn capture(&mut self) -> Result<Self::Frame<'_>, CaptureError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors reported by an [`NvsBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvsError {
    /// Namespace or key does not exist.
    NotFound,
    /// Destination buffer too small; `required` is the stored byte length.
    InvalidLength { required: usize },
    /// Partition has no free pages (needs erase).
    NoFreePages,
    /// Partition was written by a newer NVS layout (needs erase).
    NewVersionFound,
    /// Any other driver error code.
    Failed(i32),
}

/// Errors reported by a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    NotMounted,
    /// The medium carries no recognisable filesystem.
    Unformatted,
    /// Platform driver error code.
    Driver(i32),
    /// Filesystem I/O error.
    Io(std::io::ErrorKind),
}

/// Errors reported by a [`WifiDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiDriverError {
    /// Credentials do not fit the driver's configuration fields.
    InvalidConfig,
    /// Platform driver error code.
    Driver(i32),
}

/// Errors reported by a [`CapturePort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    NotInitialized,
    /// The sensor produced no frame buffer.
    NoFrame,
    Driver(i32),
}

impl fmt::Display for NvsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::InvalidLength { required } => {
                write!(f, "buffer too small ({} bytes required)", required)
            }
            Self::NoFreePages => write!(f, "no free pages"),
            Self::NewVersionFound => write!(f, "new NVS version found"),
            Self::Failed(code) => write!(f, "driver error {}", code),
        }
    }
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMounted => write!(f, "volume not mounted"),
            Self::Unformatted => write!(f, "medium is not formatted"),
            Self::Driver(code) => write!(f, "driver error {}", code),
            Self::Io(kind) => write!(f, "I/O error: {}", kind),
        }
    }
}

impl fmt::Display for WifiDriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig => write!(f, "credentials rejected by driver"),
            Self::Driver(code) => write!(f, "driver error {}", code),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "camera not initialised"),
            Self::NoFrame => write!(f, "no frame captured"),
            Self::Driver(code) => write!(f, "driver error {}", code),
        }
    }
}

impl std::error::Error for NvsError {}
impl std::error::Error for VolumeError {}
impl std::error::Error for WifiDriverError {}
impl std::error::Error for CaptureError {}

impl From<std::io::Error> for VolumeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.kind())
    }
}

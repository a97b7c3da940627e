//! System configuration parameters
//!
//! Compile-time limits and the runtime records persisted in the KVS:
//! camera sensor settings and WiFi station credentials.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pins;

// ---------------------------------------------------------------------------
// Timing and limits
// ---------------------------------------------------------------------------

/// How long `connect()` waits for the link to settle.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Connect attempts per cycle, the first one included.
pub const MAX_RETRIES: u8 = 5;
/// Bound on acquiring the Image Store mutex.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
/// Period between captures in the background capture task.
pub const CAPTURE_INTERVAL: Duration = Duration::from_secs(30);
/// Period of the main monitor loop.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// NVS namespace and key names are limited to 15 bytes.
pub const NVS_NAME_MAX: usize = 15;

pub const SSID_MAX_LEN: usize = 31;
pub const SECRET_MAX_LEN: usize = 63;
pub const SECRET_MIN_LEN: usize = 8;

pub const JPEG_QUALITY_MAX: u8 = 63;
pub const FB_COUNT_MIN: u8 = 1;
pub const FB_COUNT_MAX: u8 = 2;

// ---------------------------------------------------------------------------
// Persisted layout
// ---------------------------------------------------------------------------

pub const NS_CAMERA: &str = "camera";
pub const KEY_PIXEL_FORMAT: &str = "pixel_format";
pub const KEY_FRAME_SIZE: &str = "frame_size";
pub const KEY_JPEG_QUALITY: &str = "jpeg_quality";
pub const KEY_FB_COUNT: &str = "fb_count";

pub const NS_WIFI: &str = "wifi";
pub const KEY_SSID: &str = "ssid";
pub const KEY_PASSWORD: &str = "password";

// ---------------------------------------------------------------------------
// Camera settings
// ---------------------------------------------------------------------------

/// Sensor output format.  Discriminants are the esp32-camera `pixformat_t` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelFormat {
    Rgb565 = 0,
    Yuv422 = 1,
    Grayscale = 3,
    Jpeg = 4,
    Rgb888 = 5,
    Raw = 6,
    Rgb444 = 7,
    Rgb555 = 8,
}

impl PixelFormat {
    pub const ALL: [Self; 8] = [
        Self::Rgb565,
        Self::Yuv422,
        Self::Grayscale,
        Self::Jpeg,
        Self::Rgb888,
        Self::Raw,
        Self::Rgb444,
        Self::Rgb555,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| *f as u32 == raw)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgb565 => "RGB565",
            Self::Yuv422 => "YUV422",
            Self::Grayscale => "GRAYSCALE",
            Self::Jpeg => "JPEG",
            Self::Rgb888 => "RGB888",
            Self::Raw => "RAW",
            Self::Rgb444 => "RGB444",
            Self::Rgb555 => "RGB555",
        }
    }
}

/// Sensor resolution.  Discriminants are the esp32-camera `framesize_t` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum FrameSize {
    Qqvga = 1,
    Qvga = 5,
    Cif = 6,
    Vga = 8,
    Svga = 9,
    Xga = 10,
    Sxga = 12,
    Uxga = 13,
}

impl FrameSize {
    pub const ALL: [Self; 8] = [
        Self::Qqvga,
        Self::Qvga,
        Self::Cif,
        Self::Vga,
        Self::Svga,
        Self::Xga,
        Self::Sxga,
        Self::Uxga,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| *f as u32 == raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Qqvga => "QQVGA",
            Self::Qvga => "QVGA",
            Self::Cif => "CIF",
            Self::Vga => "VGA",
            Self::Svga => "SVGA",
            Self::Xga => "XGA",
            Self::Sxga => "SXGA",
            Self::Uxga => "UXGA",
        }
    }

    /// Width and height in pixels.
    pub fn resolution(self) -> (u16, u16) {
        match self {
            Self::Qqvga => (160, 120),
            Self::Qvga => (320, 240),
            Self::Cif => (400, 296),
            Self::Vga => (640, 480),
            Self::Svga => (800, 600),
            Self::Xga => (1024, 768),
            Self::Sxga => (1280, 1024),
            Self::Uxga => (1600, 1200),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Runtime camera configuration, persisted under [`NS_CAMERA`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    /// 0..=63, lower is better quality.
    pub jpeg_quality: u8,
    /// Frame buffers in PSRAM, 1..=2.
    pub fb_count: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Vga,
            jpeg_quality: 10,
            fb_count: 1,
        }
    }
}

impl CameraSettings {
    /// Check the numeric fields against the sensor's accepted ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.jpeg_quality > JPEG_QUALITY_MAX {
            return Err("jpeg_quality must be 0..=63");
        }
        if !(FB_COUNT_MIN..=FB_COUNT_MAX).contains(&self.fb_count) {
            return Err("fb_count must be 1..=2");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WiFi credentials
// ---------------------------------------------------------------------------

/// Station credentials, persisted under [`NS_WIFI`].
///
/// Either field may be empty when only one was stored.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub network_id: heapless::String<SSID_MAX_LEN>,
    #[serde(skip_serializing, default)]
    pub secret: heapless::String<SECRET_MAX_LEN>,
}

impl WifiCredentials {
    /// Build from borrowed strings.  `None` if either exceeds its capacity.
    pub fn new(network_id: &str, secret: &str) -> Option<Self> {
        let mut creds = Self::default();
        creds.network_id.push_str(network_id).ok()?;
        creds.secret.push_str(secret).ok()?;
        Some(creds)
    }

    pub fn is_open_network(&self) -> bool {
        self.secret.is_empty()
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("network_id", &self.network_id.as_str())
            .field("secret_len", &self.secret.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SD card
// ---------------------------------------------------------------------------

/// SDMMC mount descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdCardConfig {
    pub clk: i32,
    pub cmd: i32,
    pub d0: i32,
    /// 1 or 4 bit bus.
    pub bus_width: u8,
    pub mount_point: &'static str,
    pub max_files: u32,
    pub allocation_unit_size: usize,
}

impl Default for SdCardConfig {
    fn default() -> Self {
        Self {
            clk: pins::SD_CLK_GPIO,
            cmd: pins::SD_CMD_GPIO,
            d0: pins::SD_D0_GPIO,
            bus_width: 1,
            mount_point: pins::SD_MOUNT_POINT,
            max_files: 5,
            allocation_unit_size: 16 * 1024,
        }
    }
}

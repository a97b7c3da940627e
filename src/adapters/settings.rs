//! Camera settings and WiFi credential persistence.
//!
//! Both records are stored field by field in the KVS.  Readers tolerate
//! missing fields: camera fields fall back to their defaults, and
//! credentials are accepted as long as one of the two fields exists.

use core::fmt;

use log::{info, warn};

use crate::adapters::nvs::{Kvs, StorageError};
use crate::app::ports::NvsBackend;
use crate::config::{
    CameraSettings, FrameSize, PixelFormat, WifiCredentials, FB_COUNT_MAX, FB_COUNT_MIN,
    JPEG_QUALITY_MAX, KEY_FB_COUNT, KEY_FRAME_SIZE, KEY_JPEG_QUALITY, KEY_PASSWORD,
    KEY_PIXEL_FORMAT, KEY_SSID, NS_CAMERA, NS_WIFI, SECRET_MAX_LEN, SECRET_MIN_LEN,
    SSID_MAX_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    Storage(StorageError),
    ValidationFailed(&'static str),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage: {}", e),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<StorageError> for SettingsError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), SettingsError> {
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN || !is_printable_ascii(ssid) {
        return Err(SettingsError::ValidationFailed(
            "SSID must be 1-31 printable ASCII bytes",
        ));
    }
    Ok(())
}

pub fn validate_secret(secret: &str) -> Result<(), SettingsError> {
    if secret.is_empty() {
        return Ok(());
    }
    if !(SECRET_MIN_LEN..=SECRET_MAX_LEN).contains(&secret.len()) {
        return Err(SettingsError::ValidationFailed(
            "password must be empty or 8-63 bytes",
        ));
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

/// Absent fields read as `None`; every other error propagates.
fn optional<T>(r: Result<T, StorageError>) -> Result<Option<T>, StorageError> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(StorageError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Load station credentials.
///
/// Fails with [`StorageError::NotFound`] only when neither field is stored.
pub fn load_credentials<B: NvsBackend>(kvs: &Kvs<B>) -> Result<WifiCredentials, StorageError> {
    let network_id = optional(kvs.read_str::<SSID_MAX_LEN>(NS_WIFI, KEY_SSID))?;
    let secret = optional(kvs.read_str::<SECRET_MAX_LEN>(NS_WIFI, KEY_PASSWORD))?;

    match (network_id, secret) {
        (None, None) => Err(StorageError::NotFound),
        (network_id, secret) => {
            if network_id.is_none() {
                warn!("WiFi: stored credentials have no SSID");
            }
            if secret.is_none() {
                warn!("WiFi: stored credentials have no password");
            }
            Ok(WifiCredentials {
                network_id: network_id.unwrap_or_default(),
                secret: secret.unwrap_or_default(),
            })
        }
    }
}

/// Validate and store station credentials.
pub fn save_credentials<B: NvsBackend>(
    kvs: &Kvs<B>,
    credentials: &WifiCredentials,
) -> Result<(), SettingsError> {
    validate_ssid(&credentials.network_id)?;
    validate_secret(&credentials.secret)?;
    kvs.write_str(NS_WIFI, KEY_SSID, &credentials.network_id)?;
    kvs.write_str(NS_WIFI, KEY_PASSWORD, &credentials.secret)?;
    info!(
        "WiFi: saved credentials for '{}' (secret {} bytes)",
        credentials.network_id,
        credentials.secret.len()
    );
    Ok(())
}

/// Forget stored credentials.
pub fn clear_credentials<B: NvsBackend>(kvs: &Kvs<B>) -> Result<(), SettingsError> {
    kvs.erase_all(NS_WIFI)?;
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Camera settings
// ───────────────────────────────────────────────────────────────

/// Load camera settings, filling missing or invalid fields from defaults.
///
/// Fails with [`StorageError::NotFound`] when no field is stored at all.
pub fn load_camera_settings<B: NvsBackend>(kvs: &Kvs<B>) -> Result<CameraSettings, StorageError> {
    let defaults = CameraSettings::default();
    let pixel_format = optional(kvs.read_u32(NS_CAMERA, KEY_PIXEL_FORMAT))?;
    let frame_size = optional(kvs.read_u32(NS_CAMERA, KEY_FRAME_SIZE))?;
    let jpeg_quality = optional(kvs.read_u32(NS_CAMERA, KEY_JPEG_QUALITY))?;
    let fb_count = optional(kvs.read_u32(NS_CAMERA, KEY_FB_COUNT))?;

    if pixel_format.is_none() && frame_size.is_none() && jpeg_quality.is_none() && fb_count.is_none() {
        return Err(StorageError::NotFound);
    }

    let pixel_format = match pixel_format.map(|raw| (raw, PixelFormat::from_raw(raw))) {
        None => defaults.pixel_format,
        Some((_, Some(f))) => f,
        Some((raw, None)) => {
            warn!("Camera: unknown stored pixel format {}, using default", raw);
            defaults.pixel_format
        }
    };
    let frame_size = match frame_size.map(|raw| (raw, FrameSize::from_raw(raw))) {
        None => defaults.frame_size,
        Some((_, Some(s))) => s,
        Some((raw, None)) => {
            warn!("Camera: unknown stored frame size {}, using default", raw);
            defaults.frame_size
        }
    };
    let jpeg_quality = match jpeg_quality {
        None => defaults.jpeg_quality,
        Some(q) if q <= u32::from(JPEG_QUALITY_MAX) => q as u8,
        Some(q) => {
            warn!("Camera: stored JPEG quality {} out of range, using default", q);
            defaults.jpeg_quality
        }
    };
    let fb_count = match fb_count {
        None => defaults.fb_count,
        Some(n) if (u32::from(FB_COUNT_MIN)..=u32::from(FB_COUNT_MAX)).contains(&n) => n as u8,
        Some(n) => {
            warn!("Camera: stored frame buffer count {} out of range, using default", n);
            defaults.fb_count
        }
    };

    Ok(CameraSettings {
        pixel_format,
        frame_size,
        jpeg_quality,
        fb_count,
    })
}

/// Like [`load_camera_settings`] but never fails.
pub fn load_camera_settings_or_default<B: NvsBackend>(kvs: &Kvs<B>) -> CameraSettings {
    match load_camera_settings(kvs) {
        Ok(s) => s,
        Err(StorageError::NotFound) => {
            info!("Camera: no stored settings, using defaults");
            CameraSettings::default()
        }
        Err(e) => {
            warn!("Camera: settings unreadable ({}), using defaults", e);
            CameraSettings::default()
        }
    }
}

/// Validate and store all four camera fields.
pub fn save_camera_settings<B: NvsBackend>(
    kvs: &Kvs<B>,
    settings: &CameraSettings,
) -> Result<(), SettingsError> {
    settings.validate().map_err(SettingsError::ValidationFailed)?;
    kvs.write_u32(NS_CAMERA, KEY_PIXEL_FORMAT, settings.pixel_format as u32)?;
    kvs.write_u32(NS_CAMERA, KEY_FRAME_SIZE, settings.frame_size as u32)?;
    kvs.write_u32(NS_CAMERA, KEY_JPEG_QUALITY, u32::from(settings.jpeg_quality))?;
    kvs.write_u32(NS_CAMERA, KEY_FB_COUNT, u32::from(settings.fb_count))?;
    info!(
        "Camera: saved settings ({}, {}, quality {}, {} fb)",
        settings.pixel_format.name(),
        settings.frame_size.name(),
        settings.jpeg_quality,
        settings.fb_count
    );
    Ok(())
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::nvs::SimNvsBackend;

    fn kvs() -> Kvs<SimNvsBackend> {
        let kvs = Kvs::new(SimNvsBackend::new());
        kvs.init().unwrap();
        kvs
    }

    #[test]
    fn ssid_validation() {
        assert!(validate_ssid("ridge-cam").is_ok());
        assert!(validate_ssid("").is_err());
        assert!(validate_ssid(&"x".repeat(32)).is_err());
        assert!(validate_ssid("tab\there").is_err());
    }

    #[test]
    fn secret_validation() {
        assert!(validate_secret("").is_ok());
        assert!(validate_secret("short").is_err());
        assert!(validate_secret("eightchr").is_ok());
        assert!(validate_secret(&"p".repeat(64)).is_err());
    }

    #[test]
    fn credentials_round_trip() {
        let kvs = kvs();
        let creds = WifiCredentials::new("ridge", "trailpass").unwrap();
        save_credentials(&kvs, &creds).unwrap();
        assert_eq!(load_credentials(&kvs).unwrap(), creds);
    }

    #[test]
    fn credentials_absent() {
        assert_eq!(load_credentials(&kvs()), Err(StorageError::NotFound));
    }

    #[test]
    fn credentials_tolerate_missing_password() {
        let kvs = kvs();
        kvs.write_str(NS_WIFI, KEY_SSID, "open-net").unwrap();
        let creds = load_credentials(&kvs).unwrap();
        assert_eq!(creds.network_id, "open-net");
        assert!(creds.secret.is_empty());
    }

    #[test]
    fn invalid_credentials_not_written() {
        let kvs = kvs();
        let creds = WifiCredentials::new("ridge", "short").unwrap();
        assert!(matches!(
            save_credentials(&kvs, &creds),
            Err(SettingsError::ValidationFailed(_))
        ));
        assert_eq!(load_credentials(&kvs), Err(StorageError::NotFound));
    }

    #[test]
    fn camera_settings_absent() {
        let kvs = kvs();
        assert_eq!(load_camera_settings(&kvs), Err(StorageError::NotFound));
        assert_eq!(load_camera_settings_or_default(&kvs), CameraSettings::default());
    }

    #[test]
    fn camera_settings_round_trip() {
        let kvs = kvs();
        let s = CameraSettings {
            pixel_format: PixelFormat::Grayscale,
            frame_size: FrameSize::Uxga,
            jpeg_quality: 30,
            fb_count: 2,
        };
        save_camera_settings(&kvs, &s).unwrap();
        assert_eq!(load_camera_settings(&kvs).unwrap(), s);
    }

    #[test]
    fn partial_camera_settings_use_defaults() {
        let kvs = kvs();
        kvs.write_u32(NS_CAMERA, KEY_JPEG_QUALITY, 20).unwrap();
        let s = load_camera_settings(&kvs).unwrap();
        assert_eq!(s.jpeg_quality, 20);
        assert_eq!(s.frame_size, FrameSize::Vga);
        assert_eq!(s.fb_count, 1);
    }

    #[test]
    fn unknown_stored_values_fall_back() {
        let kvs = kvs();
        kvs.write_u32(NS_CAMERA, KEY_PIXEL_FORMAT, 2).unwrap();
        kvs.write_u32(NS_CAMERA, KEY_FB_COUNT, 9).unwrap();
        let s = load_camera_settings(&kvs).unwrap();
        assert_eq!(s.pixel_format, PixelFormat::Jpeg);
        assert_eq!(s.fb_count, 1);
    }

    #[test]
    fn invalid_camera_settings_rejected() {
        let kvs = kvs();
        let s = CameraSettings {
            jpeg_quality: 64,
            ..CameraSettings::default()
        };
        assert!(save_camera_settings(&kvs, &s).is_err());
        assert_eq!(load_camera_settings(&kvs), Err(StorageError::NotFound));
    }
}

//! HTML pages and the configuration form handler.

use core::fmt::Write as _;

use log::{info, warn};

use crate::adapters::nvs::Kvs;
use crate::adapters::settings::{
    self, load_camera_settings_or_default, save_camera_settings, save_credentials,
};
use crate::app::ports::NvsBackend;
use crate::config::{
    CameraSettings, FrameSize, PixelFormat, WifiCredentials, FB_COUNT_MAX, FB_COUNT_MIN,
    JPEG_QUALITY_MAX, SECRET_MAX_LEN, SSID_MAX_LEN,
};
use crate::web::form;

pub const ROOT_PAGE: &str = "<html><body>\
<h1>Trailcam Web Interface</h1>\
<p><a href=\"/files\">File Browser</a></p>\
<p><a href=\"/config\">Configuration</a></p>\
</body></html>";

/// Escape text for HTML element content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn selected(is: bool) -> &'static str {
    if is { " selected" } else { "" }
}

/// Render the configuration form with the current values filled in.
///
/// The stored password is never echoed; leaving the field empty keeps it.
pub fn config_page(settings: &CameraSettings, credentials: &WifiCredentials) -> String {
    let mut html = String::from(
        "<html><body><h1>Configuration</h1>\
         <form action=\"/config\" method=\"post\">\
         <h2>Camera Settings</h2>\
         <label>Pixel Format: <select name=\"pixel_format\">",
    );
    for f in PixelFormat::ALL {
        let _ = write!(
            html,
            "<option value=\"{0}\"{1}>{0}</option>",
            f.name(),
            selected(f == settings.pixel_format)
        );
    }
    html.push_str("</select></label><br><label>Frame Size: <select name=\"frame_size\">");
    for s in FrameSize::ALL {
        let (w, h) = s.resolution();
        let _ = write!(
            html,
            "<option value=\"{0}\"{1}>{0} ({2}x{3})</option>",
            s.name(),
            selected(s == settings.frame_size),
            w,
            h
        );
    }
    let _ = write!(
        html,
        "</select></label><br>\
         <label>JPEG Quality: <input type=\"number\" name=\"jpeg_quality\" \
         value=\"{}\" min=\"0\" max=\"{}\"></label><br>\
         <label>FB Count: <input type=\"number\" name=\"fb_count\" \
         value=\"{}\" min=\"{}\" max=\"{}\"></label><br>\
         <h2>WiFi Settings</h2>\
         <label>SSID: <input type=\"text\" name=\"ssid\" value=\"{}\" \
         maxlength=\"{}\"></label><br>\
         <label>Password: <input type=\"password\" name=\"password\" \
         placeholder=\"unchanged\" maxlength=\"{}\"></label><br>\
         <label><input type=\"checkbox\" name=\"open_network\"> Open network</label><br>\
         <input type=\"submit\" value=\"Save\"></form></body></html>",
        settings.jpeg_quality,
        JPEG_QUALITY_MAX,
        settings.fb_count,
        FB_COUNT_MIN,
        FB_COUNT_MAX,
        html_escape(&credentials.network_id),
        SSID_MAX_LEN,
        SECRET_MAX_LEN,
    );
    html
}

/// Load what the configuration page shows.  Missing records render as
/// defaults and empty credentials.
pub fn current_config<B: NvsBackend>(kvs: &Kvs<B>) -> (CameraSettings, WifiCredentials) {
    let settings = load_camera_settings_or_default(kvs);
    let credentials = settings::load_credentials(kvs).unwrap_or_default();
    (settings, credentials)
}

/// What a form submission changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOutcome {
    pub settings_saved: bool,
    pub credentials_saved: bool,
    /// Names of submitted fields that were ignored as invalid.
    pub rejected: Vec<&'static str>,
}

fn parse_in_range(value: &str, min: u8, max: u8) -> Option<u8> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

/// Apply a submitted configuration form.
///
/// Fields absent from `body` keep their stored values.  Invalid fields are
/// ignored with a warning; valid ones in the same submission still apply.
pub fn apply_config_form<B: NvsBackend>(kvs: &Kvs<B>, body: &str) -> ConfigOutcome {
    let (mut cam, old_creds) = current_config(kvs);
    let original = cam;
    let mut outcome = ConfigOutcome::default();

    if let Some(v) = form::field(body, "pixel_format") {
        match PixelFormat::from_name(&v) {
            Some(f) => cam.pixel_format = f,
            None => outcome.rejected.push("pixel_format"),
        }
    }
    if let Some(v) = form::field(body, "frame_size") {
        match FrameSize::from_name(&v) {
            Some(s) => cam.frame_size = s,
            None => outcome.rejected.push("frame_size"),
        }
    }
    if let Some(v) = form::field(body, "jpeg_quality") {
        match parse_in_range(&v, 0, JPEG_QUALITY_MAX) {
            Some(q) => cam.jpeg_quality = q,
            None => outcome.rejected.push("jpeg_quality"),
        }
    }
    if let Some(v) = form::field(body, "fb_count") {
        match parse_in_range(&v, FB_COUNT_MIN, FB_COUNT_MAX) {
            Some(n) => cam.fb_count = n,
            None => outcome.rejected.push("fb_count"),
        }
    }

    if cam != original {
        match save_camera_settings(kvs, &cam) {
            Ok(()) => outcome.settings_saved = true,
            Err(e) => warn!("Web: camera settings not saved: {}", e),
        }
    }

    let ssid = form::field(body, "ssid").filter(|s| !s.is_empty());
    let password = form::field(body, "password").filter(|s| !s.is_empty());
    let open_network = form::field(body, "open_network").is_some();

    let network_id = ssid.as_deref().unwrap_or(old_creds.network_id.as_str());
    let secret = if open_network {
        ""
    } else {
        password.as_deref().unwrap_or(old_creds.secret.as_str())
    };

    if network_id != old_creds.network_id.as_str() || secret != old_creds.secret.as_str() {
        match WifiCredentials::new(network_id, secret) {
            None => outcome.rejected.push("ssid/password"),
            Some(creds) => match save_credentials(kvs, &creds) {
                Ok(()) => outcome.credentials_saved = true,
                Err(e) => {
                    warn!("Web: credentials not saved: {}", e);
                    outcome.rejected.push("ssid/password");
                }
            },
        }
    }

    for field in &outcome.rejected {
        warn!("Web: ignored invalid field {}", field);
    }
    info!(
        "Web: config submitted (settings {}, credentials {})",
        if outcome.settings_saved { "saved" } else { "unchanged" },
        if outcome.credentials_saved { "saved" } else { "unchanged" }
    );
    outcome
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::nvs::SimNvsBackend;
    use crate::adapters::settings::{load_camera_settings, load_credentials};

    fn kvs() -> Kvs<SimNvsBackend> {
        let kvs = Kvs::new(SimNvsBackend::new());
        kvs.init().unwrap();
        kvs
    }

    #[test]
    fn escape_covers_markup() {
        assert_eq!(html_escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn config_page_marks_current_values() {
        let creds = WifiCredentials::new("cam<1>", "topsecret").unwrap();
        let html = config_page(&CameraSettings::default(), &creds);
        assert!(html.contains("<option value=\"JPEG\" selected>"));
        assert!(html.contains("<option value=\"VGA\" selected>"));
        assert!(html.contains("value=\"cam&lt;1&gt;\""));
        assert!(!html.contains("topsecret"));
    }

    #[test]
    fn form_updates_all_fields() {
        let kvs = kvs();
        let out = apply_config_form(
            &kvs,
            "pixel_format=GRAYSCALE&frame_size=UXGA&jpeg_quality=20&fb_count=2&ssid=ridge&password=trailpass",
        );
        assert!(out.settings_saved && out.credentials_saved);
        assert!(out.rejected.is_empty());
        let s = load_camera_settings(&kvs).unwrap();
        assert_eq!(s.pixel_format, PixelFormat::Grayscale);
        assert_eq!(s.frame_size, FrameSize::Uxga);
        assert_eq!((s.jpeg_quality, s.fb_count), (20, 2));
        assert_eq!(load_credentials(&kvs).unwrap(), WifiCredentials::new("ridge", "trailpass").unwrap());
    }

    #[test]
    fn absent_fields_keep_old_values() {
        let kvs = kvs();
        apply_config_form(&kvs, "jpeg_quality=30&ssid=ridge&password=trailpass");
        let out = apply_config_form(&kvs, "fb_count=2");
        assert!(!out.credentials_saved);
        let s = load_camera_settings(&kvs).unwrap();
        assert_eq!((s.jpeg_quality, s.fb_count), (30, 2));
        assert_eq!(load_credentials(&kvs).unwrap().secret, "trailpass");
    }

    #[test]
    fn invalid_fields_ignored() {
        let kvs = kvs();
        let out = apply_config_form(&kvs, "jpeg_quality=99&fb_count=0&frame_size=HUGE&pixel_format=JPEG");
        assert_eq!(out.rejected, vec!["frame_size", "jpeg_quality", "fb_count"]);
        assert!(!out.settings_saved);
    }

    #[test]
    fn short_password_rejected_without_touching_store() {
        let kvs = kvs();
        let out = apply_config_form(&kvs, "ssid=ridge&password=short");
        assert_eq!(out.rejected, vec!["ssid/password"]);
        assert!(load_credentials(&kvs).is_err());
    }

    #[test]
    fn open_network_clears_secret() {
        let kvs = kvs();
        apply_config_form(&kvs, "ssid=ridge&password=trailpass");
        let out = apply_config_form(&kvs, "ssid=&password=&open_network=on");
        assert!(out.credentials_saved);
        let creds = load_credentials(&kvs).unwrap();
        assert_eq!(creds.network_id, "ridge");
        assert!(creds.secret.is_empty());
    }
}

//! Configuration form flow: KVS → page → submit → KVS.

use trailcam::adapters::nvs::{Kvs, SimNvsBackend};
use trailcam::adapters::settings::{
    load_camera_settings, load_camera_settings_or_default, load_credentials,
};
use trailcam::config::{CameraSettings, FrameSize, PixelFormat, KEY_FRAME_SIZE, NS_CAMERA};
use trailcam::web::pages::{apply_config_form, config_page, current_config};
use trailcam::web::routes::{Method, Page, RouteTable};

fn kvs() -> Kvs<SimNvsBackend> {
    let kvs = Kvs::new(SimNvsBackend::new());
    kvs.init().unwrap();
    kvs
}

#[test]
fn fresh_device_renders_defaults() {
    let kvs = kvs();
    let (settings, creds) = current_config(&kvs);
    assert_eq!(settings, CameraSettings::default());
    assert!(creds.network_id.is_empty());
    let html = config_page(&settings, &creds);
    assert!(html.contains("<form action=\"/config\" method=\"post\">"));
    assert!(html.contains("name=\"jpeg_quality\" value=\"10\""));
}

#[test]
fn submitted_form_is_rendered_back() {
    let kvs = kvs();
    let out = apply_config_form(
        &kvs,
        "pixel_format=RGB565&frame_size=SVGA&jpeg_quality=5&fb_count=1&ssid=Oak+Hollow&password=p%40ss%2Bword",
    );
    assert!(out.settings_saved && out.credentials_saved);

    let creds = load_credentials(&kvs).unwrap();
    assert_eq!(creds.network_id, "Oak Hollow");
    assert_eq!(creds.secret, "p@ss+word");

    let (settings, creds) = current_config(&kvs);
    let html = config_page(&settings, &creds);
    assert!(html.contains("<option value=\"RGB565\" selected>"));
    assert!(html.contains("<option value=\"SVGA\" selected>"));
    assert!(html.contains("value=\"Oak Hollow\""));
    assert!(!html.contains("p@ss+word"));
}

#[test]
fn corrupt_stored_value_falls_back_per_field() {
    let kvs = kvs();
    apply_config_form(&kvs, "frame_size=XGA&jpeg_quality=25");
    kvs.write_u32(NS_CAMERA, KEY_FRAME_SIZE, 99).unwrap();

    let s = load_camera_settings(&kvs).unwrap();
    assert_eq!(s.frame_size, FrameSize::Vga);
    assert_eq!(s.jpeg_quality, 25);
    assert_eq!(s.pixel_format, PixelFormat::Jpeg);
}

#[test]
fn empty_submission_changes_nothing() {
    let kvs = kvs();
    let out = apply_config_form(&kvs, "");
    assert!(!out.settings_saved && !out.credentials_saved);
    assert!(out.rejected.is_empty());
    assert_eq!(load_camera_settings_or_default(&kvs), CameraSettings::default());
    assert!(load_credentials(&kvs).is_err());
}

#[test]
fn form_routes_dispatch_by_method() {
    let table = RouteTable::standard();
    assert_eq!(table.lookup("/config", Method::Get), Some(Page::ConfigForm));
    assert_eq!(table.lookup("/config", Method::Post), Some(Page::ConfigSubmit));
}

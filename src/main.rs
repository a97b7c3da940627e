//! Trailcam Firmware: Main Entry Point
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Drivers / backends                    │
//! │  EspNvsBackend   EspWifiDriver   FatVolume (SDMMC)  EspCamera │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  Kvs · ConnectivityManager (link task) · ImageStore          │
//! │  capture task (Core 1) · HTTP server · monitor loop          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_hal::peripherals::Peripherals;
use log::{error, info, warn};

use trailcam::adapters::image_store::ImageStore;
use trailcam::adapters::nvs::{EspNvsBackend, Kvs};
use trailcam::adapters::settings::load_camera_settings_or_default;
use trailcam::adapters::wifi::{ConnectivityConfig, ConnectivityManager};
use trailcam::app::link::ConnectionState;
use trailcam::capture::capture_loop;
use trailcam::config::{SdCardConfig, CAPTURE_INTERVAL, MONITOR_INTERVAL};
use trailcam::drivers::camera::EspCamera;
use trailcam::drivers::sdmmc::FatVolume;
use trailcam::drivers::task_pin::{spawn_on_core, Core};
use trailcam::drivers::wifi::EspWifiDriver;
use trailcam::error::Error;
use trailcam::web;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("Trailcam v{} starting", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let sysloop = EspSystemEventLoop::take().context("system event loop")?;

    // ── 2. Key-value store ────────────────────────────────────
    let kvs = Arc::new(Kvs::new(EspNvsBackend));
    kvs.init().map_err(Error::from).context("KVS init")?;

    // ── 3. Image store ────────────────────────────────────────
    let sd = SdCardConfig::default();
    let store = Arc::new(ImageStore::new(FatVolume::new()));
    store.mount(&sd).map_err(Error::from).context("SD card mount")?;
    let next = store
        .recover_sequence()
        .map_err(Error::from)
        .context("image sequence recovery")?;
    info!("Boot: next image will be {}.JPG", next);

    // ── 4. Camera (optional) ──────────────────────────────────
    let settings = load_camera_settings_or_default(&kvs);
    if let Ok(json) = serde_json::to_string(&settings) {
        info!("Camera: settings {}", json);
    }
    let camera = match EspCamera::init(&settings) {
        Ok(cam) => Some(cam),
        Err(e) => {
            warn!("Camera: unavailable ({}), continuing without capture", e);
            None
        }
    };

    // ── 5. Connectivity ───────────────────────────────────────
    let driver = EspWifiDriver::new(peripherals.modem, sysloop).context("WiFi driver")?;
    let mut wifi = ConnectivityManager::new(driver, kvs.clone(), ConnectivityConfig::default());
    wifi.initialize()
        .map_err(Error::from)
        .context("connectivity init")?;

    let mut server = None;
    match wifi.connect() {
        Ok(()) => server = start_web(&kvs, &sd),
        Err(e) => warn!("WiFi: not connected ({}), capturing offline", e),
    }

    // ── 6. Capture task on the application core ───────────────
    let stop = Arc::new(AtomicBool::new(false));
    let _capture = match camera {
        Some(mut cam) => {
            let store = store.clone();
            let stop = stop.clone();
            let spawned = spawn_on_core(Core::App, 5, 8, "capture\0", move || {
                capture_loop(&mut cam, &store, CAPTURE_INTERVAL, &stop)
            });
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Camera: capture task not started: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    info!("System ready. Entering monitor loop.");

    // ── 7. Monitor loop ───────────────────────────────────────
    let mut last_state = ConnectionState::Uninitialized;
    loop {
        let state = wifi.state();
        if state != last_state {
            info!("WiFi: {:?} -> {:?}", last_state, state);
            last_state = state;
        }
        if server.is_none() && wifi.is_connected() {
            server = start_web(&kvs, &sd);
        }
        std::thread::sleep(MONITOR_INTERVAL);
    }
}

fn start_web(
    kvs: &Arc<Kvs<EspNvsBackend>>,
    sd: &SdCardConfig,
) -> Option<esp_idf_svc::http::server::EspHttpServer<'static>> {
    match web::server::start(kvs.clone(), sd.mount_point) {
        Ok(server) => Some(server),
        Err(e) => {
            error!("Web: server start failed: {:#}", e);
            None
        }
    }
}

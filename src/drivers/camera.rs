//! Camera sensor drivers.
//!
//! - **`target_os = "espidf"`**: [`EspCamera`] drives the esp32-camera
//!   component through the bindings generated into `esp_idf_svc::sys::camera`.
//! - **all other targets**: [`SimCamera`] produces small JPEG-marked frames.
//!
//! Frames are never decoded here; they are handed to the Image Store as-is.

#[cfg(target_os = "espidf")]
pub use esp::EspCamera;

#[cfg(not(target_os = "espidf"))]
pub use sim::SimCamera;

#[cfg(target_os = "espidf")]
mod esp {
    use core::marker::PhantomData;

    use esp_idf_svc::sys;
    use esp_idf_svc::sys::camera;
    use log::{info, warn};

    use crate::app::ports::{CaptureError, CapturePort};
    use crate::config::CameraSettings;
    use crate::pins;

    /// Owner of the global esp32-camera driver; deinitialises it on drop.
    pub struct EspCamera {
        _private: (),
    }

    /// Frame buffer on loan from the driver; returned on drop.
    pub struct Frame<'a> {
        fb: *mut camera::camera_fb_t,
        _camera: PhantomData<&'a mut EspCamera>,
    }

    impl AsRef<[u8]> for Frame<'_> {
        fn as_ref(&self) -> &[u8] {
            // SAFETY: `fb` is a live frame buffer until `esp_camera_fb_return`;
            // `buf` holds `len` initialised bytes.
            unsafe { core::slice::from_raw_parts((*self.fb).buf, (*self.fb).len) }
        }
    }

    impl Drop for Frame<'_> {
        fn drop(&mut self) {
            // SAFETY: `fb` came from `esp_camera_fb_get` and is returned once.
            unsafe { camera::esp_camera_fb_return(self.fb) }
        }
    }

    impl EspCamera {
        /// Initialise the sensor with the board pinout and `settings`.
        pub fn init(settings: &CameraSettings) -> Result<Self, CaptureError> {
            let config = camera::camera_config_t {
                pin_pwdn: pins::CAM_PWDN_GPIO,
                pin_reset: pins::CAM_RESET_GPIO,
                pin_xclk: pins::CAM_XCLK_GPIO,
                __bindgen_anon_1: camera::camera_config_t__bindgen_ty_1 {
                    pin_sccb_sda: pins::CAM_SIOD_GPIO,
                },
                __bindgen_anon_2: camera::camera_config_t__bindgen_ty_2 {
                    pin_sccb_scl: pins::CAM_SIOC_GPIO,
                },
                pin_d7: pins::CAM_Y9_GPIO,
                pin_d6: pins::CAM_Y8_GPIO,
                pin_d5: pins::CAM_Y7_GPIO,
                pin_d4: pins::CAM_Y6_GPIO,
                pin_d3: pins::CAM_Y5_GPIO,
                pin_d2: pins::CAM_Y4_GPIO,
                pin_d1: pins::CAM_Y3_GPIO,
                pin_d0: pins::CAM_Y2_GPIO,
                pin_vsync: pins::CAM_VSYNC_GPIO,
                pin_href: pins::CAM_HREF_GPIO,
                pin_pclk: pins::CAM_PCLK_GPIO,
                xclk_freq_hz: pins::CAM_XCLK_FREQ_HZ,
                ledc_timer: sys::ledc_timer_t_LEDC_TIMER_0,
                ledc_channel: sys::ledc_channel_t_LEDC_CHANNEL_0,
                pixel_format: settings.pixel_format as camera::pixformat_t,
                frame_size: settings.frame_size as camera::framesize_t,
                jpeg_quality: i32::from(settings.jpeg_quality),
                fb_count: usize::from(settings.fb_count),
                fb_location: camera::camera_fb_location_t_CAMERA_FB_IN_PSRAM,
                grab_mode: camera::camera_grab_mode_t_CAMERA_GRAB_WHEN_EMPTY,
                ..Default::default()
            };

            // SAFETY: `config` is fully initialised and only read during the call.
            let ret = unsafe { camera::esp_camera_init(&config) };
            if ret != sys::ESP_OK as sys::esp_err_t {
                warn!("Camera: init failed ({})", ret);
                return Err(CaptureError::Driver(ret));
            }
            info!(
                "Camera: initialised ({}, {})",
                settings.pixel_format.name(),
                settings.frame_size.name()
            );
            Ok(Self { _private: () })
        }
    }

    impl CapturePort for EspCamera {
        type Frame<'a> = Frame<'a>;

        fn capture(&mut self) -> Result<Self::Frame<'_>, CaptureError> {
            // SAFETY: the driver is initialised for the lifetime of `self`.
            let fb = unsafe { camera::esp_camera_fb_get() };
            if fb.is_null() {
                return Err(CaptureError::NoFrame);
            }
            Ok(Frame {
                fb,
                _camera: PhantomData,
            })
        }
    }

    impl Drop for EspCamera {
        fn drop(&mut self) {
            // SAFETY: every frame borrows `self`, so none is outstanding here.
            let ret = unsafe { camera::esp_camera_deinit() };
            if ret != sys::ESP_OK as sys::esp_err_t {
                warn!("Camera: deinit returned {}", ret);
            }
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod sim {
    use crate::app::ports::{CaptureError, CapturePort};

    /// Synthetic camera.  Each frame is `FF D8`, a frame counter, `FF D9`.
    #[derive(Default)]
    pub struct SimCamera {
        buf: Vec<u8>,
        frames: u32,
        fail_next: Option<CaptureError>,
    }

    impl SimCamera {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next(&mut self, err: CaptureError) {
            self.fail_next = Some(err);
        }

        pub fn frames_captured(&self) -> u32 {
            self.frames
        }
    }

    impl CapturePort for SimCamera {
        type Frame<'a> = &'a [u8];

        fn capture(&mut self) -> Result<Self::Frame<'_>, CaptureError> {
            if let Some(err) = self.fail_next.take() {
                return Err(err);
            }
            self.frames += 1;
            self.buf.clear();
            self.buf.extend_from_slice(&[0xFF, 0xD8]);
            self.buf.extend_from_slice(&self.frames.to_be_bytes());
            self.buf.extend_from_slice(&[0xFF, 0xD9]);
            Ok(&self.buf)
        }
    }
}

//! GPIO / peripheral pin assignments for the ESP32-S3 trail camera board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Camera (OV2640 / OV5640 DVP bus)
// ---------------------------------------------------------------------------

/// Power-down and reset lines are not routed on this board.
pub const CAM_PWDN_GPIO: i32 = -1;
pub const CAM_RESET_GPIO: i32 = -1;

pub const CAM_XCLK_GPIO: i32 = 15;
/// SCCB (I²C-like) control bus.
pub const CAM_SIOD_GPIO: i32 = 4;
pub const CAM_SIOC_GPIO: i32 = 5;

pub const CAM_Y9_GPIO: i32 = 16;
pub const CAM_Y8_GPIO: i32 = 17;
pub const CAM_Y7_GPIO: i32 = 18;
pub const CAM_Y6_GPIO: i32 = 12;
pub const CAM_Y5_GPIO: i32 = 10;
pub const CAM_Y4_GPIO: i32 = 8;
pub const CAM_Y3_GPIO: i32 = 9;
pub const CAM_Y2_GPIO: i32 = 11;
pub const CAM_VSYNC_GPIO: i32 = 6;
pub const CAM_HREF_GPIO: i32 = 7;
pub const CAM_PCLK_GPIO: i32 = 13;

/// Sensor master clock.
pub const CAM_XCLK_FREQ_HZ: i32 = 20_000_000;

// ---------------------------------------------------------------------------
// SD card (SDMMC, 1-bit)
// ---------------------------------------------------------------------------

pub const SD_CLK_GPIO: i32 = 39;
pub const SD_CMD_GPIO: i32 = 38;
pub const SD_D0_GPIO: i32 = 40;

pub const SD_MOUNT_POINT: &str = "/sdcard";

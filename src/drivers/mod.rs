//! Peripheral drivers behind the port traits, plus task helpers.

pub mod camera;
pub mod sdmmc;
pub mod task_pin;
pub mod wifi;

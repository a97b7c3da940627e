//! Trail camera firmware library.
//!
//! Exposes the platform-independent logic for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module, with a host simulation alongside.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod capture;
pub mod config;
pub mod drivers;
pub mod error;
pub mod pins;
mod runtime_shims;
pub mod wait;
pub mod web;

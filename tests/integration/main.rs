//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a subsystem against the
//! simulation backends.  All tests run on the host with no real hardware.

#![cfg(not(target_os = "espidf"))]

mod connectivity_tests;
mod image_store_tests;
mod kvs_tests;
mod settings_web_tests;

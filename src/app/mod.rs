//! Application core: platform-independent logic, zero I/O.
//!
//! The link state machine and the platform port traits live here.  All
//! interaction with the radio, flash, SD card and camera happens through
//! the traits in [`ports`], keeping this layer testable without hardware.

pub mod link;
pub mod ports;

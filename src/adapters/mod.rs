//! Adapters: firmware services built on the port traits.
//!
//! | Adapter       | Uses port     | Provides                          |
//! |---------------|---------------|-----------------------------------|
//! | `nvs`         | NvsBackend    | Key-value store (`Kvs`)           |
//! | `settings`    | NvsBackend    | Typed camera / WiFi records       |
//! | `wifi`        | WifiDriver    | Connectivity Manager              |
//! | `image_store` | Volume        | Sequentially numbered JPEG files  |

pub mod image_store;
pub mod nvs;
pub mod settings;
pub mod wifi;

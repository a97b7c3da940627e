//! Web front end.
//!
//! Everything except [`server`] is plain logic over strings and the KVS, so
//! it runs in host tests.  [`server`] binds the [`routes::RouteTable`] to
//! `esp_idf_svc::http::server::EspHttpServer` on target.

pub mod files;
pub mod form;
pub mod pages;
pub mod routes;

#[cfg(target_os = "espidf")]
pub mod server;

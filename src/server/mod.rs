//! HTTP server for the read and assignment API

pub mod http;

pub use http::{run, serve, AppState};

//! HTTP API: realtime stream + control endpoints over axum.

pub mod app;
pub mod config;

//! Ingest agent: owns the durable queue and synchronizer and serves the local API

pub mod api;
pub mod config;

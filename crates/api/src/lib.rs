//! Annolab API server.
//!
//! HTTP/WebSocket surface over the segmentation queue, the inference
//! pool, and the export processor. The binary entrypoint is `main.rs`;
//! everything here is a library so integration tests can build the same
//! application the binary runs.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod export_source;
pub mod fallback;
pub mod handlers;
pub mod response;
pub mod router;
pub mod state;
pub mod storage;
pub mod ws;

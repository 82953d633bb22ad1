//! HTTP layer.
//!
//! The axum router exposing the repository listing, branch listing and
//! streamed ZIP download endpoints, plus health and metrics.

pub mod download;
pub mod handler;

//! Photo-to-mesh job orchestration service.
//!
//! Accepts a photo upload, dispatches it to a mesh-generation worker (remote
//! over HTTP, or an in-process simulator), and tracks each job through a
//! queued/processing/completed/failed lifecycle with polling and webhook
//! callbacks. Objects live in S3-compatible storage with a local-disk
//! fallback.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

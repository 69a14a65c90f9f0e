//! Media download service
//!
//! Accepts batches of media URLs, runs each one as an independent background
//! job on a bounded worker pool, tracks job state in memory and serves the
//! finished files from a shared download directory.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;

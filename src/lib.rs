//! Request-scoped multi-store caching for axum services.
//!
//! See [`cache`] for the caching layer itself; [`config`] and [`infra`] wire
//! it into the `multicache` binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;

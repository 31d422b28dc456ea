//! Version-coherent response caching for read-only HTTP endpoints.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;

//! CLI command implementations.

pub mod common;
pub mod config;
pub mod prepare;
pub mod serve_file;
pub mod tiling;
pub mod warp;

//! `duckpipe-mcp` crate (library surface).
//!
//! The primary entrypoint for end users is the `duckpipe` binary (CLI + MCP stdio).
//! This library module exists so embedders can reach the tool types without depending
//! on internal crate layout.

pub use duckpipe_core as core;
pub use duckpipe_local as local;

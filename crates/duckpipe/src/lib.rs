//! Public facade crate for `duckpipe`.
//!
//! This crate contains no IO or scraping logic.
//! It re-exports the backend-agnostic types/traits from `duckpipe-core`.

pub use duckpipe_core::*;

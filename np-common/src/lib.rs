//! # Neural Pitch Common Library
//!
//! Shared code for the Neural Pitch host and its tooling:
//! - Configuration loading and scratch directory layout
//! - Event types (NpEvent enum) and the EventBus
//! - SSE streaming helpers
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};

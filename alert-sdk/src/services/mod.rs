//! Service-specific client implementations
//!
//! This module contains client implementations for specific external services.

pub mod anthropic;
pub mod deepwiki;
pub mod sentry;
mod common;

pub use common::UserAgent;

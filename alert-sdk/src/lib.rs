//! # Alert SDK
//!
//! Typed clients for the external services sentralert talks to.
//!
//! This crate provides:
//!
//! - Core seams (`MetricsSource`, `Reasoner`, `CodebaseQa`) that flows and
//!   tools depend on instead of concrete clients
//! - A Sentry client for Discover queries and metric alert rules
//! - An Anthropic Messages client, including tool-use message shapes
//! - A DeepWiki client speaking MCP over an SSE transport
//! - A shared error taxonomy, bounded retries and configuration loading
//!
//! ## Architecture
//!
//! - `ServiceClient`: identity and health of an external client
//! - `ClientBuilder`: builds the shared `reqwest` client and retry executor
//! - `ServiceError`: normalized error type with retry/fatal classification
//! - `ConfigProvider`: key/value configuration from env or memory

pub mod core;
pub use core::{
    AuthenticatedClient, ClientBuilder, CodebaseQa, MetricsSource, Reasoner, RequestExecutor,
    ServiceClient,
};

pub mod services;
pub use services::{anthropic, deepwiki, sentry};

pub mod error;
pub use error::{ErrorContext, Result, ServiceError};

pub mod resilience;
pub use resilience::{RetryConfig, RetryExecutor};

pub mod config;
pub use config::{ConfigProvider, ServiceConfig};

pub mod util;

#[cfg(test)]
mod tests;

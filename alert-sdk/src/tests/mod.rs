//! Unit tests for the Alert SDK
//!
//! Client tests run against WireMock servers standing in for Sentry,
//! Anthropic and the DeepWiki MCP endpoint.

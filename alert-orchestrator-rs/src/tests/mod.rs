//! Unit tests for the orchestrator
//!
//! Flows run against mocked metrics sources and scripted model responses;
//! the apply step runs against a WireMock Sentry.

pub mod agent_tests;
pub mod apply_tests;
pub mod historical_flow_tests;
pub mod orchestrator_tests;
pub mod support;

//! Agent tools
//!
//! The tool registry and the two tools the hosted model may call while
//! analysing a service: `query_deepwiki_codebase` and `query_sentry_traces`.
//! Tools are plain request/response objects; the loop that drives them lives
//! in the orchestrator.

pub mod tool_manager;
pub mod tools;

pub use tool_manager::{ParameterDefinition, Tool, ToolError, ToolMetadata, ToolOutput, ToolRegistry};
pub use tools::{register_agent_tools, DeepWikiTool, SentryTracesTool};

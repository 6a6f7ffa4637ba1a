//! Tool Manager Module
//!
//! Registry of the tools offered to the hosted model: registration, lookup,
//! input validation and invocation by name.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use alert_sdk::anthropic::ToolDefinition;
use alert_sdk::ServiceError;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Tool parameter definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
    /// JSON Schema type (string, boolean, integer, ...)
    pub param_type: String,
    /// Default value, if any
    pub default: Option<Value>,
}

impl ParameterDefinition {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
            param_type: param_type.to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
            param_type: param_type.to_string(),
            default,
        }
    }

    fn matches_type(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "boolean" => value.is_boolean(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Tool metadata structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Name the model calls the tool by
    pub name: String,
    pub description: String,
    pub version: String,
    pub parameters: Vec<ParameterDefinition>,
}

impl ToolMetadata {
    /// JSON Schema of the tool input
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = json!({
                "type": param.param_type,
                "description": param.description,
            });
            if let Some(default) = &param.default {
                property["default"] = default.clone();
            }
            properties.insert(param.name.clone(), property);
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Tool error types
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool already exists: {0}")]
    ToolAlreadyExists(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    #[error("Tool execution error: {0}")]
    ExecutionError(String),

    #[error("SDK service error: {0}")]
    ServiceError(String),
}

impl From<ServiceError> for ToolError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Validation(msg) => ToolError::InvalidInput(msg),
            ServiceError::WithContext { inner, .. } => ToolError::from(*inner),
            other => ToolError::ServiceError(other.to_string()),
        }
    }
}

/// Result of one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// JSON document handed back to the model
    pub content: Value,
    pub duration_ms: u64,
}

impl ToolOutput {
    /// True when the content is placeholder data rather than a real answer
    pub fn is_synthetic(&self) -> bool {
        self.content
            .pointer("/metadata/synthetic")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Content as sent in a `tool_result` block
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(&self.content).unwrap_or_else(|_| self.content.to_string())
    }
}

/// Tool interface trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get tool metadata
    fn metadata(&self) -> &ToolMetadata;

    /// Execute the tool with validated input
    async fn execute(&self, input: &Value) -> Result<Value, ToolError>;

    /// Check required parameters and declared types
    fn validate_input(&self, input: &Value) -> Result<(), ToolError> {
        let object = match input {
            Value::Object(object) => object,
            Value::Null => return self.check_required(&Map::new()),
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        for param in &self.metadata().parameters {
            match object.get(&param.name) {
                Some(Value::Null) | None => {}
                Some(value) if !param.matches_type(value) => {
                    return Err(ToolError::InvalidInput(format!(
                        "parameter {} must be of type {}",
                        param.name, param.param_type
                    )));
                }
                Some(_) => {}
            }
        }
        self.check_required(object)
    }

    fn check_required(&self, object: &Map<String, Value>) -> Result<(), ToolError> {
        for param in self.metadata().parameters.iter().filter(|p| p.required) {
            if object.get(&param.name).map_or(true, Value::is_null) {
                return Err(ToolError::InvalidInput(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }
        Ok(())
    }

    /// Definition offered to the model
    fn definition(&self) -> ToolDefinition {
        let metadata = self.metadata();
        ToolDefinition {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            input_schema: metadata.input_schema(),
        }
    }
}

/// Registry of tools, kept in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool; names must be unique
    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.metadata().name.clone();
        let version = tool.metadata().version.clone();

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.iter().any(|t| t.metadata().name == name) {
            return Err(ToolError::ToolAlreadyExists(name));
        }
        tools.push(tool);

        info!("Tool {} v{} registered", name, version);
        Ok(())
    }

    pub fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.metadata().name == name)
            .cloned()
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))
    }

    /// Definitions for a Messages request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.definition())
            .collect()
    }

    /// Validate and run the named tool
    pub async fn invoke(&self, name: &str, input: &Value) -> Result<ToolOutput, ToolError> {
        let tool = self.get_tool(name)?;
        tool.validate_input(input)?;

        let started = Instant::now();
        let content = tool.execute(input).await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!("Tool {} finished in {} ms", name, duration_ms);

        Ok(ToolOutput {
            content,
            duration_ms,
        })
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        metadata: ToolMetadata,
    }

    impl EchoTool {
        fn new(name: &str) -> Self {
            Self {
                metadata: ToolMetadata {
                    name: name.to_string(),
                    description: "Echoes its input".to_string(),
                    version: "1.0.0".to_string(),
                    parameters: vec![
                        ParameterDefinition::required("text", "string", "Text to echo"),
                        ParameterDefinition::optional(
                            "loud",
                            "boolean",
                            "Upper-case the text",
                            Some(json!(false)),
                        ),
                    ],
                },
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        async fn execute(&self, input: &Value) -> Result<Value, ToolError> {
            let text = input["text"].as_str().unwrap_or_default();
            let loud = input["loud"].as_bool().unwrap_or(false);
            let echo = if loud { text.to_uppercase() } else { text.to_string() };
            Ok(json!({ "echo": echo }))
        }
    }

    #[test]
    fn test_register_and_duplicate() {
        let registry = ToolRegistry::new();
        registry.register_tool(Arc::new(EchoTool::new("echo"))).unwrap();

        let err = registry
            .register_tool(Arc::new(EchoTool::new("echo")))
            .unwrap_err();
        assert!(matches!(err, ToolError::ToolAlreadyExists(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let registry = ToolRegistry::new();
        registry.register_tool(Arc::new(EchoTool::new("b_tool"))).unwrap();
        registry.register_tool(Arc::new(EchoTool::new("a_tool"))).unwrap();

        let definitions = registry.definitions();
        assert_eq!(definitions[0].name, "b_tool");
        assert_eq!(definitions[1].name, "a_tool");
        assert_eq!(definitions[0].input_schema["required"], json!(["text"]));
        assert_eq!(
            definitions[0].input_schema["properties"]["loud"]["default"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn test_invoke_validates_input() {
        let registry = ToolRegistry::new();
        registry.register_tool(Arc::new(EchoTool::new("echo"))).unwrap();

        let output = registry
            .invoke("echo", &json!({"text": "hi", "loud": true}))
            .await
            .unwrap();
        assert_eq!(output.content["echo"], "HI");
        assert!(!output.is_synthetic());

        let missing = registry.invoke("echo", &json!({})).await.unwrap_err();
        assert!(matches!(missing, ToolError::InvalidInput(_)));

        let wrong_type = registry
            .invoke("echo", &json!({"text": 3}))
            .await
            .unwrap_err();
        assert!(matches!(wrong_type, ToolError::InvalidInput(_)));

        let unknown = registry.invoke("nope", &json!({})).await.unwrap_err();
        assert!(matches!(unknown, ToolError::ToolNotFound(_)));
    }

    #[test]
    fn test_service_error_conversion() {
        let err: ToolError = ServiceError::validation("bad period")
            .with_context_value("attempts", 1)
            .into();
        assert!(matches!(err, ToolError::InvalidInput(ref m) if m == "bad period"));

        let err: ToolError = ServiceError::timeout("slow").into();
        assert!(matches!(err, ToolError::ServiceError(_)));
    }
}

use crate::core::error::AppError;
use crate::core::types::{ErrorCategory, ParameterType, ToolKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Declared parameter of a tool. Immutable once the definition is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameterSpec {
    pub name: String,
    pub param_type: ParameterType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameterSpec {
    pub fn required(name: &str, param_type: ParameterType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            enum_values: None,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParameterType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Definition of one invocable tool, as registered by the catalog provider.
/// Read-only input to wrapper synthesis; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub kind: ToolKind,
    pub description: String,
    pub parameters: Vec<ToolParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolDefinition {
    pub fn new(name: &str, kind: ToolKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            parameters: Vec::new(),
            output_schema: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Names of parameters marked required, in declaration order.
    pub fn required_parameter_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Mapping from tool name to definition, keys unique, iteration order stable.
/// Owned by the caller; the executor borrows it for the lifetime of a run.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: IndexMap<String, ToolDefinition>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool definition. Duplicate names are rejected.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), AppError> {
        if self.tools.contains_key(&definition.name) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("duplicate tool registered: {}", definition.name),
            )
            .with_code("CAT-REG-001"));
        }
        self.tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ToolDefinition)> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

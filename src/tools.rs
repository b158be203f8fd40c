//! Tools the model can call during generation.
//!
//! A [`Tool`] declares a name, a description, and a JSON Schema for its
//! arguments. The [`ToolRegistry`] advertises every registered tool to the
//! model and dispatches the calls it makes:
//!
//! ```text
//! model ──tool_call{name, arguments}──▶ ToolRegistry::call
//!                                          │ find by name
//!                                          │ parse arguments JSON
//!                                          │ validate_params(schema)
//!                                          ▼
//!                                       Tool::execute ──▶ output string
//! ```
//!
//! Every failure on that path is a [`ToolError`] for that call alone; the
//! generator feeds it back to the model as the tool's output.
//!
//! # Usage
//!
//! ```rust
//! use aibot::tools::ToolRegistry;
//!
//! let tools = ToolRegistry::with_builtins();
//! assert!(tools.find("getWeather").is_some());
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::error::ToolError;
use crate::models::ToolSpec;

/// A capability the model may invoke by name.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use aibot::error::ToolError;
/// use aibot::tools::Tool;
///
/// pub struct ClockTool;
///
/// #[async_trait]
/// impl Tool for ClockTool {
///     fn name(&self) -> &str { "getTime" }
///     fn description(&self) -> &str { "Get the current time" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {}, "required": [] })
///     }
///
///     async fn execute(&self, _params: Value) -> Result<String, ToolError> {
///         Ok("It is noon.".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool (e.g. `"getWeather"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object: `type: "object"`,
    /// `properties`, and optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with arguments already checked by [`validate_params`].
    async fn execute(&self, params: Value) -> Result<String, ToolError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Weather
// ═══════════════════════════════════════════════════════════════════════

/// Temperatures served by [`WeatherTool`], keyed by lowercase city.
const WEATHER_BY_CITY: &[(&str, i32)] = &[("delhi", 35), ("mumbai", 32), ("bangalore", 28)];

/// Reported for any city missing from the table.
const DEFAULT_TEMPERATURE: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TemperatureUnit {
    C,
    F,
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::C => write!(f, "C"),
            TemperatureUnit::F => write!(f, "F"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherInput {
    city: String,
    unit: TemperatureUnit,
}

/// Look up the canned temperature for `city` (case-insensitive).
pub fn lookup_temperature(city: &str) -> i32 {
    let key = city.to_lowercase();
    WEATHER_BY_CITY
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| *value)
        .unwrap_or(DEFAULT_TEMPERATURE)
}

/// Deterministic weather lookup backed by a small fixed table.
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "getWeather"
    }

    fn description(&self) -> &str {
        "Get the weather for a location"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "City name" },
                "unit": { "type": "string", "enum": ["C", "F"], "description": "Temperature unit" }
            },
            "required": ["city", "unit"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String, ToolError> {
        let input: WeatherInput =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        // No unit conversion: the table value is reported in whichever unit was asked for.
        let city = input.city.trim();
        let value = lookup_temperature(city);
        Ok(format!(
            "It is currently {}°{} and Sunny in {}.",
            value, input.unit, city
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered collection of tools available to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry pre-loaded with the built-in weather tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(WeatherTool));
        registry
    }

    /// Register a tool.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Get all registered tools.
    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Declarations to send to the model, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Dispatch one model-requested call.
    ///
    /// `arguments` is the raw JSON text from the model. An empty string is
    /// treated as `{}`.
    pub async fn call(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        let params: Value = if arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| ToolError::InvalidInput(format!("arguments are not valid JSON: {}", e)))?
        };

        let params = validate_params(&tool.parameters_schema(), &params)?;
        debug!(tool = name, %params, "executing tool");
        tool.execute(params).await
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Return the count of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════

/// Validate incoming JSON parameters against a tool's schema.
///
/// Checks that params is an object, required fields, type compatibility,
/// and enum constraints. Injects default values for missing optional
/// fields. Returns the validated (and potentially enriched) parameters.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, ToolError> {
    let params_obj = params
        .as_object()
        .ok_or_else(|| {
            ToolError::InvalidInput(format!(
                "arguments must be an object, got {}",
                json_type_name(params)
            ))
        })?
        .clone();

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let mut result = params_obj.clone();

    for req_field in &required {
        if !params_obj.contains_key(req_field) {
            return Err(ToolError::InvalidInput(format!(
                "missing required parameter: {}",
                req_field
            )));
        }
    }

    for (prop_name, prop_schema) in &properties {
        if let Some(value) = params_obj.get(prop_name) {
            if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                let type_ok = match expected_type {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    return Err(ToolError::InvalidInput(format!(
                        "parameter '{}' must be of type '{}', got {}",
                        prop_name,
                        expected_type,
                        json_type_name(value)
                    )));
                }
            }

            if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                if !enum_values.contains(value) {
                    let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                    return Err(ToolError::InvalidInput(format!(
                        "parameter '{}' must be one of [{}], got {}",
                        prop_name,
                        allowed.join(", "),
                        value
                    )));
                }
            }
        } else if let Some(default) = prop_schema.get("default") {
            result.insert(prop_name.clone(), default.clone());
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// CLI entry point for `aibot tools`.
pub fn list_tools() -> Result<()> {
    let registry = ToolRegistry::with_builtins();

    println!("{:<16} DESCRIPTION", "TOOL");
    for t in registry.tools() {
        println!("{:<16} {}", t.name(), t.description());
        println!("{}", serde_json::to_string_pretty(&t.parameters_schema())?);
    }
    Ok(())
}

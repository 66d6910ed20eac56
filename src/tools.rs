//! # Tool System
//!
//! Tools are named async functions the model can ask to run. A [`Tool`] pairs a
//! [`ToolDefinition`] (name, description, JSON Schema of the arguments) with a
//! declared parameter list and a handler. A [`ToolRegistry`] owns a set of tools
//! and turns a model's [`ToolCall`] into a [`ToolResult`].
//!
//! ## Building tools
//!
//! Two paths produce the same kind of [`Tool`]:
//!
//! - **By hand** with [`ToolBuilder`] (or the [`tool`] shorthand): declare each
//!   parameter and its type, then supply a handler taking `serde_json::Value`.
//! - **From an argument type** with [`Tool::from_args`]: the schema is derived
//!   from a struct implementing `schemars::JsonSchema`. The first line of the
//!   struct's doc comment becomes the description, and `Option<T>` or
//!   `#[serde(default)]` fields become optional parameters.
//!
//! ## Execution contract
//!
//! [`ToolRegistry::execute`] never returns an error and never panics:
//!
//! ```text
//! unknown name            -> ToolResult { is_error: true, "Tool 'x' not found" }
//! validation errors       -> ToolResult { is_error: true, all errors joined }  (handler not called)
//! handler Err(..) / panic -> ToolResult { is_error: true, error text }
//! handler Ok(value)       -> ToolResult { is_error: false, value as text }
//! ```
//!
//! Arguments the tool does not declare are dropped before the handler runs.
//! Declared arguments are type-checked against their JSON type.
//!
//! ## Example
//!
//! ```rust
//! use unichat::{tool, ToolCall, ToolRegistry};
//! use serde_json::json;
//!
//! # async fn example() -> unichat::Result<()> {
//! let add = tool("add", "Add two integers")
//!     .param("a", "integer")
//!     .param("b", "integer")
//!     .build(|args| async move {
//!         Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
//!     })?;
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(add);
//!
//! let result = registry
//!     .execute(&ToolCall::from_json("call_1", "add", r#"{"a": 3, "b": 4}"#))
//!     .await;
//! assert_eq!(result.content, "7");
//! # Ok(())
//! # }
//! ```

use crate::types::{ToolCall, ToolResult};
use crate::{Error, Result};
use futures::FutureExt;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased async tool handler.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Name, description and argument schema of a tool, as sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolDefinition {
    /// Create a definition. Name and description must be non-empty.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Result<Self> {
        let name = name.into();
        let description = description.into();

        if name.trim().is_empty() {
            return Err(Error::invalid_input("tool name must not be empty"));
        }
        if description.trim().is_empty() {
            return Err(Error::invalid_input(format!(
                "tool '{}' must have a description",
                name
            )));
        }

        Ok(Self {
            name,
            description,
            parameters: normalize_schema(parameters),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON Schema of the arguments object
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Function-call shape: `{name, description, parameters}`
    pub fn to_function_format(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters
        })
    }

    /// OpenAI-style tool entry wrapping the function-call shape
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": self.to_function_format()
        })
    }

    /// Tool-use shape: `{name, description, input_schema}`
    pub fn to_tool_use_format(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters
        })
    }
}

/// JSON type a declared parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Unchecked
    Any,
}

impl ParamKind {
    /// Parse a type name. Accepts JSON Schema names and common aliases.
    pub fn from_type_str(type_str: &str) -> Self {
        match type_str {
            "string" | "str" => ParamKind::String,
            "integer" | "int" | "i32" | "i64" | "u32" | "u64" | "usize" => ParamKind::Integer,
            "number" | "float" | "f32" | "f64" => ParamKind::Number,
            "boolean" | "bool" => ParamKind::Boolean,
            "array" | "list" | "vec" => ParamKind::Array,
            "object" | "dict" | "map" => ParamKind::Object,
            _ => ParamKind::Any,
        }
    }

    /// JSON Schema type name, `None` for [`ParamKind::Any`]
    pub fn json_type(&self) -> Option<&'static str> {
        match self {
            ParamKind::String => Some("string"),
            ParamKind::Integer => Some("integer"),
            ParamKind::Number => Some("number"),
            ParamKind::Boolean => Some("boolean"),
            ParamKind::Array => Some("array"),
            ParamKind::Object => Some("object"),
            ParamKind::Any => None,
        }
    }

    /// Whether `value` has this JSON type. Numbers accept integers.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Must be present in every call
    pub required: bool,
    /// `null` is an accepted value
    pub nullable: bool,
}

/// A callable tool: definition, declared parameters, and handler.
#[derive(Clone)]
pub struct Tool {
    definition: ToolDefinition,
    params: Vec<ParamSpec>,
    handler: ToolHandler,
}

impl Tool {
    /// Create a tool from a name, description, argument schema and handler.
    ///
    /// The schema may be full JSON Schema or the simple notation
    /// `{"location": "string", "units": "string"}`; both are normalized.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let definition = ToolDefinition::new(name, description, input_schema)?;
        let params = params_from_schema(definition.parameters());

        Ok(Self {
            definition,
            params,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        })
    }

    /// Derive a tool from a typed argument struct.
    ///
    /// The description is the first line of `A`'s doc comment; a type without
    /// one is rejected. Arguments are deserialized into `A` before the handler
    /// runs, and the handler's return value is serialized back to JSON.
    ///
    /// ```rust
    /// use schemars::JsonSchema;
    /// use serde::Deserialize;
    /// use unichat::Tool;
    ///
    /// /// Get the current weather for a location.
    /// #[derive(Deserialize, JsonSchema)]
    /// struct WeatherArgs {
    ///     location: String,
    /// }
    ///
    /// let weather = Tool::from_args("get_weather", |args: WeatherArgs| async move {
    ///     Ok(format!("Sunny in {}", args.location))
    /// }).unwrap();
    /// assert_eq!(weather.description(), "Get the current weather for a location.");
    /// ```
    pub fn from_args<A, R, F, Fut>(name: impl Into<String>, handler: F) -> Result<Self>
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let name = name.into();
        let mut schema = serde_json::to_value(schemars::schema_for!(A))?;

        let description = schema
            .get("description")
            .and_then(Value::as_str)
            .and_then(|doc| doc.lines().next())
            .map(|line| line.trim().to_string())
            .unwrap_or_default();
        if description.is_empty() {
            return Err(Error::invalid_input(format!(
                "tool '{}' needs a description: document the argument type",
                name
            )));
        }

        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
            obj.remove("description");
        }

        let definition = ToolDefinition::new(name, description, schema)?;
        let params = params_from_schema(definition.parameters());

        let handler: ToolHandler = Arc::new(move |args: Value| {
            let invocation = serde_json::from_value::<A>(args).map(|typed| handler(typed));
            Box::pin(async move {
                let output = invocation?.await?;
                Ok(serde_json::to_value(output)?)
            })
        });

        Ok(Self {
            definition,
            params,
            handler,
        })
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn description(&self) -> &str {
        self.definition.description()
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Check arguments against the declared parameters.
    ///
    /// Returns the arguments with undeclared keys removed, or every problem
    /// found: missing required parameters and type mismatches are all
    /// collected, not just the first.
    pub fn validate(
        &self,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, Vec<String>> {
        let mut errors = Vec::new();

        for spec in self.params.iter().filter(|p| p.required) {
            if !arguments.contains_key(&spec.name) {
                errors.push(format!("Missing required parameter '{}'", spec.name));
            }
        }

        let mut accepted = Map::new();
        for (key, value) in arguments {
            let Some(spec) = self.params.iter().find(|p| &p.name == key) else {
                log::debug!("Dropping undeclared argument '{}' for tool '{}'", key, self.name());
                continue;
            };

            let type_ok = if value.is_null() {
                spec.nullable || spec.kind == ParamKind::Any
            } else {
                spec.kind.matches(value)
            };

            if type_ok {
                accepted.insert(key.clone(), value.clone());
            } else {
                errors.push(format!(
                    "Parameter '{}' expected {}, got {}",
                    key,
                    spec.kind.json_type().unwrap_or("any"),
                    json_type_name(value)
                ));
            }
        }

        if errors.is_empty() {
            Ok(accepted)
        } else {
            Err(errors)
        }
    }

    /// Run the handler on raw arguments, without validation.
    pub async fn invoke(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    /// Validate and run a call, folding every failure into the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let arguments = match self.validate(&call.arguments) {
            Ok(arguments) => arguments,
            Err(errors) => {
                return ToolResult::error(
                    &call.id,
                    format!(
                        "Invalid arguments for tool '{}': {}",
                        self.name(),
                        errors.join("; ")
                    ),
                );
            }
        };

        // The handler call sits inside the async block so a panic while
        // building the future is caught as well.
        let outcome = AssertUnwindSafe(async { (self.handler)(Value::Object(arguments)).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => ToolResult::success(&call.id, stringify_output(value)),
            Ok(Err(e)) => ToolResult::error(
                &call.id,
                format!("Error executing tool '{}': {}", self.name(), e),
            ),
            Err(panic) => ToolResult::error(
                &call.id,
                format!(
                    "Error executing tool '{}': {}",
                    self.name(),
                    panic_message(panic.as_ref())
                ),
            ),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("definition", &self.definition)
            .field("params", &self.params)
            .finish()
    }
}

fn stringify_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Top-level keys that only appear in a real JSON Schema.
const SCHEMA_KEYWORDS: &[&str] = &[
    "$schema",
    "$defs",
    "$ref",
    "definitions",
    "properties",
    "additionalProperties",
];

/// Whether `obj` is already a JSON Schema rather than simple notation.
///
/// A string `type` or any schema keyword marks a full schema, so
/// `{"type": "object"}` is a tool without parameters, not a parameter named
/// `type`.
fn is_full_schema(obj: &Map<String, Value>) -> bool {
    matches!(obj.get("type"), Some(Value::String(_)))
        || SCHEMA_KEYWORDS.iter().any(|key| obj.contains_key(*key))
}

/// Normalize simple or extended notation into a full object schema.
///
/// A full schema passes through, with `type` and an empty `properties`
/// filled in when missing. Otherwise each key is a parameter: a string value
/// is a type name (required); an object value is a property schema whose
/// `optional`/`required` flags and `default` decide whether it is required.
fn normalize_schema(schema: Value) -> Value {
    let Value::Object(mut obj) = schema else {
        return empty_object_schema();
    };

    if is_full_schema(&obj) {
        obj.entry("type").or_insert_with(|| json!("object"));
        obj.entry("properties").or_insert_with(|| json!({}));
        return Value::Object(obj);
    }

    let mut properties = Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        if let Some((prop, is_required)) = simple_property(param_type) {
            properties.insert(param_name.clone(), prop);
            if is_required {
                required.push(param_name);
            }
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

/// One simple-notation entry as a property schema plus its required flag.
fn simple_property(value: Value) -> Option<(Value, bool)> {
    match value {
        Value::String(type_str) => Some((kind_schema(ParamKind::from_type_str(&type_str)), true)),
        Value::Object(mut prop) => {
            let is_optional = prop
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_required = prop.remove("required").and_then(|v| v.as_bool());
            let has_default = prop.contains_key("default");

            let required = match is_required {
                Some(flag) => flag,
                None => !(is_optional || has_default),
            };
            Some((Value::Object(prop), required))
        }
        _ => None,
    }
}

fn kind_schema(kind: ParamKind) -> Value {
    match kind.json_type() {
        Some(t) => json!({ "type": t }),
        None => json!({}),
    }
}

/// Read the declared parameter list back out of an object schema.
fn params_from_schema(schema: &Value) -> Vec<ParamSpec> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| {
            let (kind, nullable) = property_kind(prop);
            ParamSpec {
                name: name.clone(),
                kind,
                required: required.contains(&name.as_str()),
                nullable,
            }
        })
        .collect()
}

/// Kind and nullability of one property schema.
///
/// Handles `"type": "t"`, `"type": ["t", "null"]`, and the
/// `anyOf: [{..}, {"type": "null"}]` form used for optional references.
fn property_kind(prop: &Value) -> (ParamKind, bool) {
    match prop.get("type") {
        Some(Value::String(t)) => (ParamKind::from_type_str(t), false),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            let non_null: Vec<&str> = names.into_iter().filter(|t| *t != "null").collect();
            let kind = match non_null.as_slice() {
                [single] => ParamKind::from_type_str(single),
                _ => ParamKind::Any,
            };
            (kind, nullable)
        }
        _ => {
            let variants = prop
                .get("anyOf")
                .or_else(|| prop.get("oneOf"))
                .and_then(Value::as_array);
            match variants {
                Some(variants) => {
                    let nullable = variants
                        .iter()
                        .any(|v| v.get("type").and_then(Value::as_str) == Some("null"));
                    (ParamKind::Any, nullable)
                }
                None => (ParamKind::Any, false),
            }
        }
    }
}

/// Builder for hand-constructed tool descriptors.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: empty_object_schema(),
        }
    }

    /// Replace the schema entirely (full JSON Schema or simple notation).
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Add a required parameter.
    pub fn param(self, name: &str, type_str: &str) -> Self {
        self.property(name, json!(type_str))
    }

    /// Add a required parameter with a description for the model.
    pub fn param_with_description(self, name: &str, type_str: &str, description: &str) -> Self {
        let mut prop = kind_schema(ParamKind::from_type_str(type_str));
        prop["description"] = json!(description);
        prop["required"] = json!(true);
        self.property(name, prop)
    }

    /// Add an optional parameter that may be omitted or `null`.
    pub fn optional_param(self, name: &str, type_str: &str) -> Self {
        let prop = match ParamKind::from_type_str(type_str).json_type() {
            Some(t) => json!({ "type": [t, "null"], "optional": true }),
            None => json!({ "optional": true }),
        };
        self.property(name, prop)
    }

    /// Add a parameter with a default value; it may be omitted.
    pub fn param_with_default(self, name: &str, type_str: &str, default: Value) -> Self {
        let mut prop = kind_schema(ParamKind::from_type_str(type_str));
        prop["default"] = default;
        self.property(name, prop)
    }

    fn property(mut self, name: &str, prop: Value) -> Self {
        // A non-object schema set through `schema()` is discarded.
        if !self.schema.is_object() {
            self.schema = empty_object_schema();
        }
        let Some(obj) = self.schema.as_object_mut() else {
            return self;
        };

        if !is_full_schema(obj) {
            obj.insert(name.to_string(), prop);
            return self;
        }

        // Full schema: the parameter goes under `properties` and `required`
        let Some((prop, required)) = simple_property(prop) else {
            return self;
        };
        let properties = obj.entry("properties").or_insert_with(|| json!({}));
        if !properties.is_object() {
            *properties = json!({});
        }
        if let Some(properties) = properties.as_object_mut() {
            properties.insert(name.to_string(), prop);
        }

        let names = obj.entry("required").or_insert_with(|| json!([]));
        if !names.is_array() {
            *names = json!([]);
        }
        if let Some(names) = names.as_array_mut() {
            names.retain(|n| n.as_str() != Some(name));
            if required {
                names.push(json!(name));
            }
        }
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Result<Tool>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

/// Shorthand for [`ToolBuilder::new`].
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Caller-owned set of tools, keyed by name.
///
/// Registration order is kept for [`list_tools`](Self::list_tools) and
/// [`get_definitions`](Self::get_definitions); registering a name again
/// replaces the earlier tool in place.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Last registration under a name wins.
    pub fn register(&mut self, tool: Tool) -> &mut Self {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => {
                log::debug!("Replacing tool '{}'", tool.name());
                *existing = tool;
            }
            None => self.tools.push(tool),
        }
        self
    }

    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Tool>) -> &mut Self {
        for tool in tools {
            self.register(tool);
        }
        self
    }

    pub fn unregister(&mut self, name: &str) -> Option<Tool> {
        let index = self.tools.iter().position(|t| t.name() == name)?;
        Some(self.tools.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tool names in registration order
    pub fn list_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one call. Never fails: unknown tools, invalid arguments and
    /// handler failures all come back as error-flagged results.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => {
                log::warn!("Model requested unknown tool '{}'", call.name);
                ToolResult::error(&call.id, format!("Tool '{}' not found", call.name))
            }
        }
    }

    /// Execute several calls concurrently; results are in call order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        futures::future::join_all(calls.iter().map(|call| self.execute(call))).await
    }
}

//! Tool proxies materialised from provider schemas.
//!
//! Each tool a provider lists becomes a [`ToolDescriptor`] (its name,
//! description and parameter slots) and then a [`ToolProxy`], a cheap handle
//! that knows the owning provider by name and forwards calls through the
//! [`Router`].
//!
//! Parameters are typed: every schema property maps to a [`ParamType`] and
//! values are carried as [`ParamValue`]s. A call is assembled with the
//! [`ToolCall`] builder, which checks types as values are bound and checks
//! required parameters before anything is serialised.
//!
//! ```no_run
//! # async fn demo(proxy: &stdio_mcp_bridge::bridge::ToolProxy)
//! #     -> Result<(), stdio_mcp_bridge::error::BridgeError> {
//! let text = proxy
//!     .call()
//!     .set("path", "/tmp/notes.txt")?
//!     .set("limit", 20)?
//!     .invoke()
//!     .await;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::bridge::router::Router;
use crate::error::BridgeError;

/// Type of a parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// JSON string. Also used for schema types the bridge does not model.
    String,
    /// JSON integer.
    Integer,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
}

impl ParamType {
    /// Maps a JSON Schema `type` tag to a slot type.
    ///
    /// Returns `None` for tags other than `string`, `integer`, `number` and
    /// `boolean`.
    #[must_use]
    pub fn from_schema_tag(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Returns the JSON Schema tag for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// String value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
}

impl ParamValue {
    /// Returns the type of this value.
    #[must_use]
    pub const fn param_type(&self) -> ParamType {
        match self {
            Self::String(_) => ParamType::String,
            Self::Integer(_) => ParamType::Integer,
            Self::Number(_) => ParamType::Number,
            Self::Boolean(_) => ParamType::Boolean,
        }
    }

    /// Converts the value to JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::Boolean(b) => Value::Bool(*b),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// One parameter slot of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    /// Property name.
    pub name: String,
    /// Slot type.
    pub param_type: ParamType,
    /// Property description, empty if the schema has none.
    pub description: String,
    /// Whether the property is listed in the schema's `required` array.
    pub required: bool,
    /// The schema's `type` tag when it is not one the bridge models.
    pub unmodelled_type: Option<String>,
}

/// A tool as declared by a provider in `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name, unique within its provider.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Parameter slots derived from `inputSchema.properties`.
    pub params: Vec<ParamSpec>,
    /// The input schema as the provider sent it.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Builds a descriptor from a name, description and JSON input schema.
    ///
    /// Properties without a recognised `type` tag get string slots. A
    /// property is required if it appears in the schema's `required` array.
    #[must_use]
    pub fn from_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        let required: Vec<&str> = input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let params = input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| {
                        let tag = property.get("type").and_then(Value::as_str);
                        let modelled = tag.and_then(ParamType::from_schema_tag);
                        ParamSpec {
                            name: name.clone(),
                            param_type: modelled.unwrap_or(ParamType::String),
                            description: property
                                .get("description")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            required: required.contains(&name.as_str()),
                            unmodelled_type: match (tag, modelled) {
                                (Some(tag), None) => Some(tag.to_string()),
                                _ => None,
                            },
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            params,
            input_schema,
        }
    }

    /// Builds a descriptor from one entry of a `tools/list` result.
    ///
    /// # Errors
    ///
    /// Returns a message if the entry has no string `name`.
    pub fn from_listing(entry: &Value) -> Result<Self, String> {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| format!("tool entry without a name: {entry}"))?;
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let input_schema = entry
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(Self::from_schema(name, description, input_schema))
    }

    /// Looks up a parameter slot by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Builds the proxy for `descriptor`, owned by the provider named `provider`.
#[must_use]
pub fn materialize(descriptor: ToolDescriptor, provider: &str, router: &Router) -> ToolProxy {
    ToolProxy {
        descriptor: Arc::new(descriptor),
        provider: provider.to_string(),
        router: router.clone(),
    }
}

/// A locally callable stand-in for one remote tool.
///
/// Cloning is cheap. The proxy refers to its provider by name only and never
/// keeps the provider process alive.
#[derive(Debug, Clone)]
pub struct ToolProxy {
    descriptor: Arc<ToolDescriptor>,
    provider: String,
    router: Router,
}

impl ToolProxy {
    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Returns the tool description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    /// Returns the name of the provider that owns this tool.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns the parameter slots.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.descriptor.params
    }

    /// Returns the input schema as the provider declared it.
    #[must_use]
    pub fn input_schema(&self) -> &Value {
        &self.descriptor.input_schema
    }

    /// Returns the full descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Starts building a call with no values bound.
    #[must_use]
    pub fn call(&self) -> ToolCall<'_> {
        ToolCall {
            proxy: self,
            bound: BTreeMap::new(),
            explicit: Map::new(),
        }
    }

    /// Binds `arguments` to the parameter slots and invokes the tool.
    ///
    /// Never fails: every error is returned as text starting with `Error: `.
    pub async fn invoke(&self, arguments: Map<String, Value>) -> String {
        self.try_invoke(arguments)
            .await
            .unwrap_or_else(|e| e.to_tool_text())
    }

    /// Like [`ToolProxy::invoke`], but keeps the error structured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArguments`] if `arguments` do not fit the
    /// schema, or any routing error from [`Router::try_invoke`].
    pub async fn try_invoke(&self, arguments: Map<String, Value>) -> Result<String, BridgeError> {
        self.call().bind(arguments)?.try_invoke().await
    }
}

/// A call under construction.
///
/// Typed values go into parameter slots through [`ToolCall::set`] or
/// [`ToolCall::bind`]. Raw values added with [`ToolCall::arg`] are sent as
/// they are and win over a slot value of the same name.
#[derive(Debug, Clone)]
pub struct ToolCall<'a> {
    proxy: &'a ToolProxy,
    bound: BTreeMap<String, ParamValue>,
    explicit: Map<String, Value>,
}

impl ToolCall<'_> {
    fn invalid(&self, reason: String) -> BridgeError {
        BridgeError::InvalidArguments {
            tool: self.proxy.name().to_string(),
            reason,
        }
    }

    /// Binds a typed value to the slot `name`.
    ///
    /// Integers are accepted for number slots.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArguments`] if there is no such slot, the
    /// type does not match, or a number is not finite.
    pub fn set(mut self, name: &str, value: impl Into<ParamValue>) -> Result<Self, BridgeError> {
        let value = value.into();
        let Some(spec) = self.proxy.descriptor.param(name) else {
            return Err(self.invalid(format!("unknown parameter '{name}'")));
        };

        let value = match (spec.param_type, value) {
            #[allow(clippy::cast_precision_loss)] // widening an integer into a number slot
            (ParamType::Number, ParamValue::Integer(i)) => ParamValue::Number(i as f64),
            (_, ParamValue::Number(n)) if !n.is_finite() => {
                return Err(self.invalid(format!("parameter '{name}' must be a finite number")));
            }
            (expected, value) if value.param_type() == expected => value,
            (expected, value) => {
                return Err(self.invalid(format!(
                    "parameter '{name}' expects {expected}, got {}",
                    value.param_type()
                )));
            }
        };

        self.bound.insert(name.to_string(), value);
        Ok(self)
    }

    /// Binds a JSON object of arguments.
    ///
    /// Values for known slots are converted to the slot type (numeric strings
    /// are accepted for number and integer slots, `"true"`/`"false"` for
    /// boolean slots); `null` leaves a slot unset. Keys without a slot, and
    /// non-string values for properties whose schema type the bridge does not
    /// model, are passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArguments`] if a value cannot be
    /// converted to its slot type.
    pub fn bind(mut self, arguments: Map<String, Value>) -> Result<Self, BridgeError> {
        for (name, value) in arguments {
            let Some(spec) = self.proxy.descriptor.param(&name) else {
                self.explicit.insert(name, value);
                continue;
            };
            if value.is_null() {
                continue;
            }
            match coerce(spec.param_type, &value) {
                Some(converted) => {
                    self.bound.insert(name, converted);
                }
                None if spec.unmodelled_type.is_some() => {
                    self.explicit.insert(name, value);
                }
                None => {
                    let reason = format!(
                        "parameter '{name}' expects {}, got {value}",
                        spec.param_type
                    );
                    return Err(self.invalid(reason));
                }
            }
        }
        Ok(self)
    }

    /// Adds a raw argument that is sent unchanged.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.explicit.insert(name.into(), value);
        self
    }

    /// Validates required parameters and returns the `arguments` object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArguments`] if a required parameter has
    /// neither a bound value nor a non-null raw argument.
    pub fn arguments(&self) -> Result<Map<String, Value>, BridgeError> {
        let missing: Vec<&str> = self
            .proxy
            .params()
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| {
                !self.bound.contains_key(&spec.name)
                    && self.explicit.get(&spec.name).map_or(true, Value::is_null)
            })
            .map(|spec| spec.name.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(self.invalid(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )));
        }

        let mut arguments: Map<String, Value> = self
            .bound
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        arguments.extend(self.explicit.clone());
        Ok(arguments)
    }

    /// Sends the call and returns the tool's text, or the error as text.
    pub async fn invoke(self) -> String {
        self.try_invoke().await.unwrap_or_else(|e| e.to_tool_text())
    }

    /// Sends the call, keeping errors structured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArguments`] before anything is sent if
    /// validation fails, otherwise any error from [`Router::try_invoke`].
    pub async fn try_invoke(self) -> Result<String, BridgeError> {
        let arguments = self.arguments()?;
        self.proxy
            .router
            .try_invoke(self.proxy.provider(), self.proxy.name(), arguments)
            .await
    }
}

/// Converts a JSON value to the given slot type, if it fits.
fn coerce(param_type: ParamType, value: &Value) -> Option<ParamValue> {
    match param_type {
        ParamType::String => value.as_str().map(|s| ParamValue::String(s.to_string())),
        ParamType::Integer => match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .map(ParamValue::Integer),
        ParamType::Number => match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
        .map(ParamValue::Number),
        ParamType::Boolean => match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s == "true" => Some(true),
            Value::String(s) if s == "false" => Some(false),
            _ => None,
        }
        .map(ParamValue::Boolean),
    }
}

/// Returns `n` as an integer if it has no fractional part and fits in `i64`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)] // range-checked
fn integral(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::BridgeErrorKind;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::from_schema(
            "search",
            "Search documents",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search text"},
                    "limit": {"type": "integer"},
                    "threshold": {"type": "number"},
                    "exact": {"type": "boolean"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "mode": {}
                },
                "required": ["query", "limit"]
            }),
        )
    }

    fn proxy() -> ToolProxy {
        materialize(descriptor(), "docs", &Router::detached())
    }

    #[test]
    fn schema_maps_to_typed_slots() {
        let d = descriptor();
        assert_eq!(d.params.len(), 6);

        let query = d.param("query").unwrap();
        assert_eq!(query.param_type, ParamType::String);
        assert_eq!(query.description, "Search text");
        assert!(query.required);

        let limit = d.param("limit").unwrap();
        assert_eq!(limit.param_type, ParamType::Integer);
        assert!(limit.required);

        assert_eq!(d.param("threshold").unwrap().param_type, ParamType::Number);
        assert_eq!(d.param("exact").unwrap().param_type, ParamType::Boolean);
        assert!(!d.param("exact").unwrap().required);
    }

    #[test]
    fn unrecognised_types_default_to_string() {
        let d = descriptor();
        let tags = d.param("tags").unwrap();
        assert_eq!(tags.param_type, ParamType::String);
        assert_eq!(tags.unmodelled_type.as_deref(), Some("array"));

        let mode = d.param("mode").unwrap();
        assert_eq!(mode.param_type, ParamType::String);
        assert!(mode.unmodelled_type.is_none());
    }

    #[test]
    fn listing_entry_without_schema_has_no_params() {
        let d = ToolDescriptor::from_listing(&json!({"name": "ping"})).unwrap();
        assert_eq!(d.name, "ping");
        assert_eq!(d.description, "");
        assert!(d.params.is_empty());
        assert!(ToolDescriptor::from_listing(&json!({"description": "nameless"})).is_err());
    }

    #[test]
    fn proxy_exposes_descriptor() {
        let p = proxy();
        assert_eq!(p.name(), "search");
        assert_eq!(p.description(), "Search documents");
        assert_eq!(p.provider(), "docs");
        assert_eq!(p.params().len(), 6);
        assert!(p.input_schema().get("properties").is_some());
    }

    #[test]
    fn required_integer_left_unset_is_rejected() {
        let p = proxy();
        let err = p.call().set("query", "rust").unwrap().arguments().unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::InvalidArguments);
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn integer_slot_serialises_as_json_integer() {
        let p = proxy();
        let arguments = p
            .call()
            .set("query", "rust")
            .unwrap()
            .set("limit", 5)
            .unwrap()
            .arguments()
            .unwrap();
        assert_eq!(arguments.get("limit"), Some(&json!(5)));
        assert!(arguments["limit"].is_i64());
        assert!(!arguments.contains_key("exact"));
    }

    #[test]
    fn set_checks_types() {
        let p = proxy();
        let err = p.call().set("limit", "five").unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::InvalidArguments);
        assert!(err.to_string().contains("expects integer"));

        let err = p.call().set("nope", 1).unwrap_err();
        assert!(err.to_string().contains("unknown parameter"));

        let err = p.call().set("threshold", f64::NAN).unwrap_err();
        assert!(err.to_string().contains("finite"));

        let call = p.call().set("threshold", 2).unwrap();
        assert_eq!(call.bound.get("threshold"), Some(&ParamValue::Number(2.0)));
    }

    #[test]
    fn bind_coerces_json_values() {
        let p = proxy();
        let arguments = json!({
            "query": "rust",
            "limit": "10",
            "threshold": 0.5,
            "exact": "true",
            "mode": null
        });
        let Value::Object(arguments) = arguments else {
            unreachable!()
        };
        let out = p.call().bind(arguments).unwrap().arguments().unwrap();
        assert_eq!(out["limit"], json!(10));
        assert_eq!(out["threshold"], json!(0.5));
        assert_eq!(out["exact"], json!(true));
        assert!(!out.contains_key("mode"));
    }

    #[test]
    fn bind_accepts_integral_floats_for_integers() {
        let p = proxy();
        let mut arguments = Map::new();
        arguments.insert("limit".to_string(), json!(3.0));
        let call = p.call().bind(arguments).unwrap();
        assert_eq!(call.bound.get("limit"), Some(&ParamValue::Integer(3)));

        let mut arguments = Map::new();
        arguments.insert("limit".to_string(), json!(3.5));
        assert!(p.call().bind(arguments).is_err());
    }

    #[test]
    fn structured_values_for_unmodelled_types_pass_through() {
        let p = proxy();
        let mut arguments = Map::new();
        arguments.insert("tags".to_string(), json!(["a", "b"]));
        arguments.insert("extra".to_string(), json!({"k": 1}));
        let out = p
            .call()
            .bind(arguments)
            .unwrap()
            .set("query", "q")
            .unwrap()
            .set("limit", 1)
            .unwrap()
            .arguments()
            .unwrap();
        assert_eq!(out["tags"], json!(["a", "b"]));
        assert_eq!(out["extra"], json!({"k": 1}));
    }

    #[test]
    fn explicit_arguments_take_precedence() {
        let p = proxy();
        let out = p
            .call()
            .set("query", "bound")
            .unwrap()
            .set("limit", 1)
            .unwrap()
            .arg("query", json!("explicit"))
            .arguments()
            .unwrap();
        assert_eq!(out["query"], json!("explicit"));
    }

    #[test]
    fn explicit_argument_satisfies_required() {
        let p = proxy();
        let out = p
            .call()
            .arg("query", json!("q"))
            .arg("limit", json!(2))
            .arguments()
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn invalid_arguments_are_returned_as_text() {
        let p = proxy();
        let text = p.invoke(Map::new()).await;
        assert!(text.starts_with("Error: "));
        assert!(text.contains("missing required"));
    }

    #[tokio::test]
    async fn detached_proxy_reports_unknown_provider() {
        let p = proxy();
        let err = p
            .call()
            .set("query", "q")
            .unwrap()
            .set("limit", 1)
            .unwrap()
            .try_invoke()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::UnknownProvider);
    }
}

//! Compile-time parameter schemas shared by actions and strategies
//!
//! A [`ParamSchema`] is a closed list of typed fields. Validation applies
//! defaults, type-checks every value and rejects fields the schema does not
//! declare.

use crate::error::{OptimizerError, Result};
use serde_json::{json, Map, Value};

/// Type constraint of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    /// String that must not be empty
    NonEmptyString,
    Uuid,
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    /// One of a fixed set of strings
    Enum(&'static [&'static str]),
    Array,
    Object,
}

impl FieldType {
    fn json_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::NonEmptyString | FieldType::Uuid | FieldType::Enum(_) => {
                "string"
            }
            FieldType::Integer { .. } => "integer",
            FieldType::Number { .. } => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    fn check(&self, name: &str, value: &Value) -> Result<()> {
        let fail = |reason: String| -> Result<()> {
            Err(OptimizerError::invalid(format!(
                "parameter '{}' {}",
                name, reason
            )))
        };

        match self {
            FieldType::String => match value {
                Value::String(_) => Ok(()),
                _ => fail("must be a string".to_string()),
            },
            FieldType::NonEmptyString => match value {
                Value::String(s) if !s.trim().is_empty() => Ok(()),
                _ => fail("must be a non-empty string".to_string()),
            },
            FieldType::Uuid => match value.as_str().map(uuid::Uuid::parse_str) {
                Some(Ok(_)) => Ok(()),
                _ => fail("must be a UUID".to_string()),
            },
            FieldType::Integer { min, max } => {
                let Some(n) = value.as_i64() else {
                    return fail("must be an integer".to_string());
                };
                if let Some(min) = min {
                    if n < *min {
                        return fail(format!("must be >= {}", min));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return fail(format!("must be <= {}", max));
                    }
                }
                Ok(())
            }
            FieldType::Number { min, max } => {
                let Some(n) = value.as_f64() else {
                    return fail("must be a number".to_string());
                };
                if let Some(min) = min {
                    if n < *min {
                        return fail(format!("must be >= {}", min));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return fail(format!("must be <= {}", max));
                    }
                }
                Ok(())
            }
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(()),
                _ => fail("must be a boolean".to_string()),
            },
            FieldType::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => Ok(()),
                _ => fail(format!("must be one of {:?}", allowed)),
            },
            FieldType::Array => match value {
                Value::Array(_) => Ok(()),
                _ => fail("must be an array".to_string()),
            },
            FieldType::Object => match value {
                Value::Object(_) => Ok(()),
                _ => fail("must be an object".to_string()),
            },
        }
    }
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl Field {
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            default: None,
            description: "",
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}

/// Closed schema for a parameter map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    fields: Vec<Field>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Validate `params`, returning a copy with defaults filled in
    pub fn validate(&self, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        for key in params.keys() {
            if !self.fields.iter().any(|f| f.name == key) {
                return Err(OptimizerError::invalid(format!(
                    "unknown parameter '{}'",
                    key
                )));
            }
        }

        let mut validated = Map::new();
        for field in &self.fields {
            match params.get(field.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &field.default {
                        validated.insert(field.name.to_string(), default.clone());
                    } else if field.required {
                        return Err(OptimizerError::invalid(format!(
                            "missing required parameter '{}'",
                            field.name
                        )));
                    }
                }
                Some(value) => {
                    field.field_type.check(field.name, value)?;
                    validated.insert(field.name.to_string(), value.clone());
                }
            }
        }

        Ok(validated)
    }

    /// JSON-Schema style description, persisted with strategies
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(field.field_type.json_type()));
            if !field.description.is_empty() {
                prop.insert("description".into(), json!(field.description));
            }
            if let Some(default) = &field.default {
                prop.insert("default".into(), default.clone());
            }
            match &field.field_type {
                FieldType::Enum(values) => {
                    prop.insert("enum".into(), json!(values));
                }
                FieldType::Integer { min, max } => {
                    if let Some(min) = min {
                        prop.insert("minimum".into(), json!(min));
                    }
                    if let Some(max) = max {
                        prop.insert("maximum".into(), json!(max));
                    }
                }
                FieldType::Number { min, max } => {
                    if let Some(min) = min {
                        prop.insert("minimum".into(), json!(min));
                    }
                    if let Some(max) = max {
                        prop.insert("maximum".into(), json!(max));
                    }
                }
                _ => {}
            }
            properties.insert(field.name.to_string(), Value::Object(prop));
            if field.required {
                required.push(field.name);
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Read a string parameter out of a validated map
pub fn get_str<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

/// Read a numeric parameter out of a validated map
pub fn get_f64(params: &Map<String, Value>, name: &str) -> Option<f64> {
    params.get(name).and_then(Value::as_f64)
}

/// Read an integer parameter out of a validated map
pub fn get_i64(params: &Map<String, Value>, name: &str) -> Option<i64> {
    params.get(name).and_then(Value::as_i64)
}

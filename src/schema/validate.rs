//! Compiled validator over a resolved schema.
//!
//! Covers the keyword subset the engine guarantees: `type`, `enum`,
//! `const`, `properties`, `required`, `additionalProperties`, `items`,
//! array/string length bounds, and numeric bounds. Unknown keywords are
//! ignored, as JSON-Schema prescribes.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::SchemaError;

/// One validation failure, addressed by a value-tree path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    Integer,
    String,
}

impl SchemaType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "null" => Some(Self::Null),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Number => value.is_number(),
            Self::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            Self::String => value.is_string(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }
}

#[derive(Debug, Clone, Default)]
enum Additional {
    #[default]
    Allow,
    Deny,
    Schema(Box<Compiled>),
}

/// A schema compiled into a validation tree.
#[derive(Debug, Clone, Default)]
pub struct Compiled {
    never: bool,
    types: Option<Vec<SchemaType>>,
    enum_values: Option<Vec<Value>>,
    const_value: Option<Value>,
    properties: BTreeMap<String, Compiled>,
    required: Vec<String>,
    additional: Additional,
    items: Option<Box<Compiled>>,
    min_items: Option<u64>,
    max_items: Option<u64>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

pub fn compile(schema: &Value) -> Result<Compiled, SchemaError> {
    match schema {
        Value::Bool(true) => Ok(Compiled::default()),
        Value::Bool(false) => Ok(Compiled {
            never: true,
            ..Compiled::default()
        }),
        Value::Object(map) => {
            let mut compiled = Compiled::default();

            match map.get("type") {
                Some(Value::String(name)) => {
                    compiled.types = Some(
                        SchemaType::parse(name)
                            .map(|t| vec![t])
                            .ok_or(SchemaError::NotASchema)?,
                    );
                }
                Some(Value::Array(names)) => {
                    let mut types = Vec::with_capacity(names.len());
                    for name in names {
                        let name = name.as_str().ok_or(SchemaError::NotASchema)?;
                        types.push(SchemaType::parse(name).ok_or(SchemaError::NotASchema)?);
                    }
                    compiled.types = Some(types);
                }
                _ => {}
            }

            if let Some(Value::Array(options)) = map.get("enum") {
                compiled.enum_values = Some(options.clone());
            }
            if let Some(value) = map.get("const") {
                compiled.const_value = Some(value.clone());
            }

            if let Some(Value::Object(props)) = map.get("properties") {
                for (key, sub) in props {
                    compiled.properties.insert(key.clone(), compile(sub)?);
                }
            }
            if let Some(Value::Array(required)) = map.get("required") {
                compiled.required = required
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
            }
            match map.get("additionalProperties") {
                Some(Value::Bool(false)) => compiled.additional = Additional::Deny,
                Some(Value::Bool(true)) | None => {}
                Some(sub) => compiled.additional = Additional::Schema(Box::new(compile(sub)?)),
            }

            if let Some(items) = map.get("items") {
                compiled.items = Some(Box::new(compile(items)?));
            }

            compiled.min_items = map.get("minItems").and_then(Value::as_u64);
            compiled.max_items = map.get("maxItems").and_then(Value::as_u64);
            compiled.min_length = map.get("minLength").and_then(Value::as_u64);
            compiled.max_length = map.get("maxLength").and_then(Value::as_u64);
            compiled.minimum = map.get("minimum").and_then(Value::as_f64);
            compiled.maximum = map.get("maximum").and_then(Value::as_f64);

            Ok(compiled)
        }
        _ => Err(SchemaError::NotASchema),
    }
}

impl Compiled {
    pub fn validate(&self, value: &Value) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        self.check(value, "/", &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check(&self, value: &Value, path: &str, out: &mut Vec<Violation>) {
        if self.never {
            out.push(violation(path, "schema permits no value"));
            return;
        }

        if let Some(types) = &self.types
            && !types.iter().any(|t| t.matches(value))
        {
            let expected: Vec<&str> = types.iter().map(|t| t.name()).collect();
            out.push(violation(
                path,
                format!("expected {}, got {}", expected.join(" or "), type_name(value)),
            ));
            return;
        }

        if let Some(options) = &self.enum_values
            && !options.contains(value)
        {
            out.push(violation(path, "not one of the enumerated values"));
        }
        if let Some(expected) = &self.const_value
            && value != expected
        {
            out.push(violation(path, "does not equal the const value"));
        }

        match value {
            Value::Object(map) => {
                for key in &self.required {
                    if !map.contains_key(key) {
                        out.push(violation(path, format!("missing required property {key:?}")));
                    }
                }
                for (key, child) in map {
                    let child_path = join(path, key);
                    if let Some(sub) = self.properties.get(key) {
                        sub.check(child, &child_path, out);
                    } else {
                        match &self.additional {
                            Additional::Allow => {}
                            Additional::Deny => out.push(violation(
                                &child_path,
                                "additional properties are not allowed",
                            )),
                            Additional::Schema(sub) => sub.check(child, &child_path, out),
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(min) = self.min_items
                    && (items.len() as u64) < min
                {
                    out.push(violation(path, format!("fewer than {min} items")));
                }
                if let Some(max) = self.max_items
                    && (items.len() as u64) > max
                {
                    out.push(violation(path, format!("more than {max} items")));
                }
                if let Some(sub) = &self.items {
                    for (index, item) in items.iter().enumerate() {
                        sub.check(item, &join(path, &index.to_string()), out);
                    }
                }
            }
            Value::String(s) => {
                let len = s.chars().count() as u64;
                if let Some(min) = self.min_length
                    && len < min
                {
                    out.push(violation(path, format!("shorter than {min} characters")));
                }
                if let Some(max) = self.max_length
                    && len > max
                {
                    out.push(violation(path, format!("longer than {max} characters")));
                }
            }
            Value::Number(n) => {
                let n = n.as_f64().unwrap_or_default();
                if let Some(min) = self.minimum
                    && n < min
                {
                    out.push(violation(path, format!("less than minimum {min}")));
                }
                if let Some(max) = self.maximum
                    && n > max
                {
                    out.push(violation(path, format!("greater than maximum {max}")));
                }
            }
            _ => {}
        }
    }
}

fn violation(path: &str, message: impl Into<String>) -> Violation {
    Violation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn join(path: &str, key: &str) -> String {
    if path == "/" {
        format!("/{key}")
    } else {
        format!("{path}/{key}")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

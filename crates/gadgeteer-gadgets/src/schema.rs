//! Typed parameter schemas with coercion, defaults, and validation

use serde_json::{json, Map, Value};

/// Parameter type tree. Mirrors what JSON can express, plus enums.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Enum(Vec<String>),
    Array(Box<ParamType>),
    Object(Vec<ParamField>),
}

impl ParamType {
    fn label(&self) -> String {
        match self {
            Self::String => "string".into(),
            Self::Number => "number".into(),
            Self::Integer => "integer".into(),
            Self::Boolean => "boolean".into(),
            Self::Enum(variants) => format!("enum({})", variants.join(" | ")),
            Self::Array(inner) => format!("array<{}>", inner.label()),
            Self::Object(_) => "object".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamField {
    pub name: String,
    pub ty: ParamType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamField {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            required: false,
            default: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare a default. A defaulted field is never required.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }
}

/// Structured validation failure, pointing at the offending field.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid parameter at '{}': {}", self.path, self.message)
    }
}

impl ValidationError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// A gadget's top-level parameter schema: a set of named fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSchema {
    pub fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: ParamField) -> Self {
        self.fields.push(field);
        self
    }

    /// Coerce and validate `params`, applying declared defaults. Returns the
    /// normalized parameter object, or the first mismatch. Undeclared keys
    /// pass through untouched so gadgets can accept free-form extras.
    pub fn validate(&self, params: &Value) -> Result<Value, ValidationError> {
        let input = match params {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ValidationError::new(
                    "$",
                    format!("expected an object, got {}", type_name(other)),
                ))
            }
        };
        validate_fields(&self.fields, input, "$")
    }

    /// Canonical JSON-style description tree, shown to the model in the
    /// gadget catalog.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|f| (f.name.clone(), field_descriptor(f)))
                .collect(),
        )
    }

    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_else(|_| "{}".to_string())
    }
}

fn field_descriptor(field: &ParamField) -> Value {
    let mut descriptor = Map::new();
    descriptor.insert("type".into(), json!(field.ty.label()));
    if let Some(d) = &field.description {
        descriptor.insert("description".into(), json!(d));
    }
    if field.required {
        descriptor.insert("required".into(), json!(true));
    }
    if let Some(default) = &field.default {
        descriptor.insert("default".into(), default.clone());
    }
    if let ParamType::Object(fields) = &field.ty {
        descriptor.insert(
            "fields".into(),
            Value::Object(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), field_descriptor(f)))
                    .collect(),
            ),
        );
    }
    Value::Object(descriptor)
}

fn validate_fields(
    fields: &[ParamField],
    mut input: Map<String, Value>,
    path: &str,
) -> Result<Value, ValidationError> {
    let mut output = Map::new();

    for field in fields {
        let field_path = format!("{}.{}", path, field.name);
        match input.remove(&field.name) {
            Some(value) => {
                output.insert(field.name.clone(), coerce(&value, &field.ty, &field_path)?);
            }
            None => match (&field.default, field.required) {
                (Some(default), _) => {
                    output.insert(field.name.clone(), default.clone());
                }
                (None, true) => {
                    return Err(ValidationError::new(&field_path, "missing required parameter"))
                }
                (None, false) => {}
            },
        }
    }

    // Undeclared extras pass through.
    for (key, value) in input {
        output.insert(key, value);
    }
    Ok(Value::Object(output))
}

fn coerce(value: &Value, ty: &ParamType, path: &str) -> Result<Value, ValidationError> {
    match ty {
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(json!(n.to_string())),
            Value::Bool(b) => Ok(json!(b.to_string())),
            other => Err(mismatch(path, "string", other)),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|n| json!(n))
                .map_err(|_| mismatch(path, "number", value)),
            _ => Err(mismatch(path, "number", value)),
        },
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(json!(f as i64)),
                _ => Err(mismatch(path, "integer", value)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|n| json!(n))
                .map_err(|_| mismatch(path, "integer", value)),
            _ => Err(mismatch(path, "integer", value)),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim() {
                "true" => Ok(json!(true)),
                "false" => Ok(json!(false)),
                _ => Err(mismatch(path, "boolean", value)),
            },
            _ => Err(mismatch(path, "boolean", value)),
        },
        ParamType::Enum(variants) => match value {
            Value::String(s) if variants.contains(s) => Ok(value.clone()),
            Value::String(s) => Err(ValidationError::new(
                path,
                format!("'{}' is not one of: {}", s, variants.join(", ")),
            )),
            other => Err(mismatch(path, "enum string", other)),
        },
        ParamType::Array(inner) => match value {
            Value::Array(items) => {
                let coerced = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| coerce(item, inner, &format!("{}[{}]", path, i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(coerced))
            }
            // A lone scalar where an array is declared wraps to one element.
            other => Ok(Value::Array(vec![coerce(other, inner, path)?])),
        },
        ParamType::Object(fields) => match value {
            Value::Object(map) => validate_fields(fields, map.clone(), path),
            other => Err(mismatch(path, "object", other)),
        },
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> ValidationError {
    ValidationError::new(path, format!("expected {}, got {}", expected, type_name(got)))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(ParamField::required("msg", ParamType::String).describe("text to echo"))
            .field(ParamField::optional("count", ParamType::Integer).with_default(json!(1)))
    }

    #[test]
    fn applies_defaults() {
        let out = schema().validate(&json!({"msg": "hi"})).unwrap();
        assert_eq!(out, json!({"msg": "hi", "count": 1}));
    }

    #[test]
    fn missing_required_names_the_path() {
        let err = schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.path, "$.msg");
    }

    #[test]
    fn coerces_string_to_integer() {
        let out = schema()
            .validate(&json!({"msg": "hi", "count": "3"}))
            .unwrap();
        assert_eq!(out["count"], json!(3));
    }

    #[test]
    fn rejects_non_integer_string() {
        let err = schema()
            .validate(&json!({"msg": "hi", "count": "three"}))
            .unwrap_err();
        assert_eq!(err.path, "$.count");
    }

    #[test]
    fn scalar_wraps_into_declared_array() {
        let schema = ParamSchema::new()
            .field(ParamField::required("tags", ParamType::Array(Box::new(ParamType::String))));
        let out = schema.validate(&json!({"tags": "solo"})).unwrap();
        assert_eq!(out, json!({"tags": ["solo"]}));
    }

    #[test]
    fn enum_mismatch_lists_variants() {
        let schema = ParamSchema::new().field(ParamField::required(
            "mode",
            ParamType::Enum(vec!["fast".into(), "slow".into()]),
        ));
        let err = schema.validate(&json!({"mode": "medium"})).unwrap_err();
        assert!(err.message.contains("fast, slow"));
    }

    #[test]
    fn nested_object_paths() {
        let schema = ParamSchema::new().field(ParamField::required(
            "opts",
            ParamType::Object(vec![ParamField::required("depth", ParamType::Integer)]),
        ));
        let err = schema
            .validate(&json!({"opts": {"depth": "x"}}))
            .unwrap_err();
        assert_eq!(err.path, "$.opts.depth");
    }

    #[test]
    fn undeclared_keys_pass_through() {
        let out = schema()
            .validate(&json!({"msg": "hi", "extra": true}))
            .unwrap();
        assert_eq!(out["extra"], json!(true));
    }

    #[test]
    fn render_is_a_json_tree() {
        let rendered = schema().render();
        assert!(rendered.contains("\"type\": \"string\""));
        assert!(rendered.contains("\"default\": 1"));
    }
}

//! Lightweight JSON Schema subset validator.
//!
//! Supports the fragment of JSON Schema that tool parameter declarations and
//! structured-output schemas actually use: the primitive type tags
//! (`object`, `array`, `string`, `number`, `integer`, `boolean`), `enum`,
//! `required`, recursive `properties`/`items`, and
//! `additionalProperties: false`.  Anything outside that subset is ignored
//! rather than rejected, so schemas written for full validators still work.

use serde_json::Value;

/// Outcome of a validation pass.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub valid: bool,
    /// One entry per violation, each prefixed with the JSON path involved.
    pub errors: Vec<String>,
}

impl SchemaValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Validate `value` against `schema`.
pub fn validate_schema(value: &Value, schema: &Value) -> SchemaValidation {
    let mut errors = Vec::new();
    check(value, schema, "", &mut errors);
    if errors.is_empty() {
        SchemaValidation::ok()
    } else {
        SchemaValidation::fail(errors)
    }
}

fn path_label(path: &str) -> &str {
    if path.is_empty() {
        "value"
    } else {
        path
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

fn check(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let schema = match schema.as_object() {
        Some(s) => s,
        None => return,
    };

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            errors.push(format!(
                "{}: not one of the allowed values",
                path_label(path)
            ));
            return;
        }
    }

    let declared = schema.get("type").and_then(|t| t.as_str());
    match declared {
        Some("object") => check_object(value, schema, path, errors),
        Some("array") => check_array(value, schema, path, errors),
        Some("string") => {
            if !value.is_string() {
                errors.push(format!(
                    "{}: expected string, got {}",
                    path_label(path),
                    type_name(value)
                ));
            }
        }
        Some("number") => {
            if !value.is_number() {
                errors.push(format!(
                    "{}: expected number, got {}",
                    path_label(path),
                    type_name(value)
                ));
            }
        }
        Some("integer") => {
            // A number without a fractional part satisfies integer.
            let is_integral = value.as_i64().is_some()
                || value.as_u64().is_some()
                || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false);
            if !is_integral {
                errors.push(format!(
                    "{}: expected integer, got {}",
                    path_label(path),
                    type_name(value)
                ));
            }
        }
        Some("boolean") => {
            if !value.is_boolean() {
                errors.push(format!(
                    "{}: expected boolean, got {}",
                    path_label(path),
                    type_name(value)
                ));
            }
        }
        _ => {}
    }
}

fn check_object(
    value: &Value,
    schema: &serde_json::Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    let object = match value.as_object() {
        Some(o) => o,
        None => {
            errors.push(format!(
                "{}: expected object, got {}",
                path_label(path),
                type_name(value)
            ));
            return;
        }
    };

    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !object.contains_key(name) {
                errors.push(format!(
                    "{}: missing required property \"{}\"",
                    path_label(path),
                    name
                ));
            }
        }
    }

    if let Some(properties) = properties {
        for (name, prop_schema) in properties {
            if let Some(prop_value) = object.get(name) {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", path, name)
                };
                check(prop_value, prop_schema, &child_path, errors);
            }
        }
    }

    let additional_allowed = schema
        .get("additionalProperties")
        .and_then(|a| a.as_bool())
        .unwrap_or(true);
    if !additional_allowed {
        for key in object.keys() {
            let declared = properties.map(|p| p.contains_key(key)).unwrap_or(false);
            if !declared {
                errors.push(format!(
                    "{}: unexpected property \"{}\"",
                    path_label(path),
                    key
                ));
            }
        }
    }
}

fn check_array(
    value: &Value,
    schema: &serde_json::Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    let items = match value.as_array() {
        Some(a) => a,
        None => {
            errors.push(format!(
                "{}: expected array, got {}",
                path_label(path),
                type_name(value)
            ));
            return;
        }
    };

    if let Some(item_schema) = schema.get("items") {
        for (index, item) in items.iter().enumerate() {
            let child_path = format!("{}[{}]", path_label(path), index);
            check(item, item_schema, &child_path, errors);
        }
    }
}

use serde_json::{json, Map, Value};

/// Builds the object schema a tool declares at registration.
pub fn object_schema(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let mut props = Map::new();
    for (name, prop) in properties {
        props.insert(name.to_string(), prop.clone());
    }
    json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

pub fn string_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

pub fn string_enum(description: &str, values: &[&str]) -> Value {
    json!({"type": "string", "description": description, "enum": values})
}

pub fn integer_prop(description: &str) -> Value {
    json!({"type": "integer", "description": description})
}

/// Validates a parsed argument object against a declared schema. Checks
/// required membership, primitive types and enum membership; properties
/// the schema does not declare pass through untouched.
pub fn validate_args(schema: &Value, args: &Map<String, Value>) -> Result<(), String> {
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    for required in schema
        .get("required")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let Some(name) = required.as_str() else {
            continue;
        };
        if !args.contains_key(name) {
            return Err(format!("missing required argument `{name}`"));
        }
    }

    for (name, value) in args {
        let Some(declared) = properties.get(name) else {
            continue;
        };
        if let Some(expected) = declared.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(format!(
                    "argument `{name}` must be of type {expected}, got {}",
                    type_name(value)
                ));
            }
        }
        if let Some(allowed) = declared.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let options = allowed
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(format!(
                    "argument `{name}` must be one of: {options}"
                ));
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
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

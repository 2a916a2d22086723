use serde_json::Value;

/// JSON-Schema keywords that some dialects reject in tool declarations.
const STRIPPED_KEYWORDS: &[&str] = &["$schema", "additionalProperties", "default", "examples", "title"];

/// Recursively removes unsupported schema keywords while leaving the
/// structural keywords (type, properties, required, enum, items) intact.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut cleaned = serde_json::Map::new();
            for (key, value) in map {
                if STRIPPED_KEYWORDS.contains(&key.as_str()) {
                    continue;
                }
                cleaned.insert(key.clone(), sanitize_schema(value));
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize_schema;
    use serde_json::json;

    #[test]
    fn strips_unsupported_keywords_recursively() {
        let schema = json!({
            "$schema": "https://json-schema.org/draft-07/schema#",
            "additionalProperties": false,
            "title": "X",
            "type": "object",
            "properties": {
                "n": {"type": "number", "default": 1},
                "nested": {
                    "type": "object",
                    "examples": [{"a": 1}],
                    "properties": {"a": {"type": "string", "title": "A"}}
                }
            }
        });
        let cleaned = sanitize_schema(&schema);
        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "n": {"type": "number"},
                    "nested": {
                        "type": "object",
                        "properties": {"a": {"type": "string"}}
                    }
                }
            })
        );
    }
}

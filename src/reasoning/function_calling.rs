// Tool schemas to Gemini function declarations

use serde_json::{json, Map, Value};

/// Convert one JSON schema into the subset Gemini accepts
///
/// Keeps type, description, enum, properties, items and required. A schema
/// without a type becomes `object` when it has properties, else `string`.
pub fn convert_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return json!({"type": "object"});
    };
    let properties = obj.get("properties").and_then(Value::as_object);

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if properties.map(|p| !p.is_empty()).unwrap_or(false) {
                "object".to_string()
            } else {
                "string".to_string()
            }
        });

    let mut out = Map::new();
    out.insert("type".to_string(), json!(kind));
    if let Some(desc) = obj.get("description") {
        out.insert("description".to_string(), desc.clone());
    }
    if let Some(values) = obj.get("enum").filter(|v| v.is_array()) {
        out.insert("enum".to_string(), values.clone());
    }
    if let Some(props) = properties.filter(|p| !p.is_empty()) {
        let converted: Map<String, Value> = props
            .iter()
            .map(|(k, v)| {
                let v = if v.is_object() { convert_schema(v) } else { json!({"type": "string"}) };
                (k.clone(), v)
            })
            .collect();
        out.insert("properties".to_string(), Value::Object(converted));
    }
    if kind == "array" {
        let items = obj
            .get("items")
            .map(convert_schema)
            .unwrap_or_else(|| json!({"type": "string"}));
        out.insert("items".to_string(), items);
    }
    if let Some(required) = obj
        .get("required")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
    {
        out.insert("required".to_string(), Value::Array(required.clone()));
    }
    Value::Object(out)
}

/// `[{"function_declarations": [...]}]` for tool dicts carrying
/// name, description and parameters
pub fn to_function_declarations(tools: &[Value]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            let params = tool
                .get("parameters")
                .filter(|p| p.is_object())
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"}));
            json!({
                "name": tool.get("name").and_then(Value::as_str).unwrap_or("unnamed_function"),
                "description": tool.get("description").and_then(Value::as_str).unwrap_or(""),
                "parameters": convert_schema(&params),
            })
        })
        .collect();
    json!([{"function_declarations": declarations}])
}

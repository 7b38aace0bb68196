// JSON schema layout analysis
//
// MCP tools come in two shapes:
// - flat: arguments are the top-level properties ({"id": 3})
// - object-root: a single required property of type object wraps every
//   field ({"reserva": {"usuario": "...", "id_vuelo": "..."}})

use serde_json::{Map, Value};

/// Shape of a tool's input schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Flat,
    ObjectRoot { root_key: String },
}

/// Result of analysing a tool input schema
#[derive(Debug, Clone)]
pub struct SchemaAnalysis {
    pub layout: Layout,
    /// Schema that directly owns the fields: the root property for
    /// object-root, the whole schema for flat
    pub fields_schema: Value,
    /// Required fields at the level arguments are extracted
    pub required_fields: Vec<String>,
    pub total_fields: usize,
}

impl SchemaAnalysis {
    pub fn analyze(schema: &Value) -> Self {
        let required = required_list(schema);
        let properties = properties_of(schema);

        if required.len() == 1 {
            if let Some(root) = properties.and_then(|p| p.get(&required[0])) {
                if root.get("type").and_then(Value::as_str) == Some("object") {
                    let inner_required = required_list(root);
                    let inner_count = properties_of(root).map(|p| p.len()).unwrap_or(0);
                    return Self {
                        layout: Layout::ObjectRoot {
                            root_key: required[0].clone(),
                        },
                        fields_schema: root.clone(),
                        total_fields: inner_required.len().max(inner_count),
                        required_fields: inner_required,
                    };
                }
            }
        }

        let count = properties.map(|p| p.len()).unwrap_or(0);
        Self {
            layout: Layout::Flat,
            fields_schema: schema.clone(),
            total_fields: required.len().max(count),
            required_fields: required,
        }
    }

    pub fn is_object_root(&self) -> bool {
        matches!(self.layout, Layout::ObjectRoot { .. })
    }

    pub fn root_key(&self) -> Option<&str> {
        match &self.layout {
            Layout::ObjectRoot { root_key } => Some(root_key),
            Layout::Flat => None,
        }
    }

    /// Properties at the extraction level
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        properties_of(&self.fields_schema)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties().and_then(|p| p.get(name))
    }

    /// Short name used in logs
    pub fn layout_name(&self) -> &'static str {
        match self.layout {
            Layout::Flat => "flat",
            Layout::ObjectRoot { .. } => "object_root",
        }
    }
}

/// The `required` array of a schema, ignoring non-string entries
pub fn required_list(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn properties_of(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

/// Declared type of a property
///
/// Properties carrying `properties` or `$ref` without a type are objects;
/// anything else without a type is treated as a string.
pub fn property_type(prop: &Value) -> &str {
    match prop.get("type").and_then(Value::as_str) {
        Some(t) => t,
        None if prop.get("properties").map(Value::is_object).unwrap_or(false)
            || prop.get("$ref").is_some() =>
        {
            "object"
        }
        None => "string",
    }
}

/// Strict JSON type check; unknown type names accept anything
pub fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

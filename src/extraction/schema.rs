// Schema-driven argument extraction
//
// Walks a tool's input schema and asks the value extractor for each field,
// producing arguments shaped like the schema (flat or wrapped in a root).

use serde_json::{Map, Value};
use tracing::debug;

use super::value::ValueExtractor;
use crate::tools::schema::{property_type, SchemaAnalysis};

#[derive(Debug, Clone, Default)]
pub struct SchemaExtractor {
    values: ValueExtractor,
}

impl SchemaExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value_extractor(&self) -> &ValueExtractor {
        &self.values
    }

    /// Extract arguments for `schema` from `text`
    ///
    /// Object-root schemas yield `{root: {...}}`, or `{}` when no field was
    /// found. Fields are visited in sorted order.
    pub fn extract_arguments(&self, schema: &Value, text: &str, tool_name: &str) -> Map<String, Value> {
        self.extract_with(schema, text, tool_name, |field, prop| {
            self.values.extract_value(text, field, prop)
        })
    }

    /// Like `extract_arguments`, falling back to recent user messages
    pub fn extract_arguments_with_context(
        &self,
        schema: &Value,
        text: &str,
        history: &[(String, String)],
        tool_name: &str,
    ) -> Map<String, Value> {
        self.extract_with(schema, text, tool_name, |field, prop| {
            self.values.extract_with_context(text, field, prop, history)
        })
    }

    fn extract_with<F>(&self, schema: &Value, text: &str, tool_name: &str, extract: F) -> Map<String, Value>
    where
        F: Fn(&str, &Value) -> Option<Value>,
    {
        if !schema.is_object() || text.is_empty() {
            return Map::new();
        }

        let analysis = SchemaAnalysis::analyze(schema);
        debug!(
            tool = tool_name,
            layout = analysis.layout_name(),
            root_key = ?analysis.root_key(),
            total_fields = analysis.total_fields,
            "Extracting arguments"
        );

        let mut fields = Map::new();
        if let Some(props) = analysis.properties() {
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for name in names {
                let prop = with_resolved_type(&props[name.as_str()]);
                let value = extract(name.as_str(), &prop);
                debug!(tool = tool_name, field = %name, found = value.is_some(), "Field extraction");
                if let Some(value) = value {
                    fields.insert(name.clone(), value);
                }
            }
        }

        match analysis.root_key() {
            Some(root) if !fields.is_empty() => {
                let mut wrapped = Map::new();
                wrapped.insert(root.to_string(), Value::Object(fields));
                wrapped
            }
            Some(_) => Map::new(),
            None => fields,
        }
    }
}

/// Property schema with an explicit `type`, inferred when missing
fn with_resolved_type(prop: &Value) -> Value {
    let mut resolved = match prop {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if !resolved.contains_key("type") {
        resolved.insert("type".to_string(), Value::String(property_type(prop).to_string()));
    }
    Value::Object(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn avion_schema() -> Value {
        json!({
            "type": "object",
            "required": ["avion"],
            "properties": {
                "avion": {
                    "type": "object",
                    "required": ["modelo", "capacidad", "aerolinea"],
                    "properties": {
                        "modelo": {"type": "string"},
                        "capacidad": {"type": "integer"},
                        "aerolinea": {"type": "string"}
                    }
                }
            }
        })
    }

    #[test]
    fn test_object_root_arguments_are_wrapped() {
        let extractor = SchemaExtractor::new();
        let args = extractor.extract_arguments(
            &avion_schema(),
            "crear avion modelo: A320, capacidad: 180, aerolinea: Avianca",
            "create_avion",
        );
        let avion = args["avion"].as_object().unwrap();
        assert_eq!(avion["modelo"], json!("A320"));
        assert_eq!(avion["capacidad"], json!(180));
        assert_eq!(avion["aerolinea"], json!("Avianca"));
    }

    #[test]
    fn test_object_root_without_values_is_empty() {
        let extractor = SchemaExtractor::new();
        let args = extractor.extract_arguments(&avion_schema(), "hola que tal", "create_avion");
        assert!(args.is_empty());
    }

    #[test]
    fn test_flat_arguments() {
        let schema = json!({
            "type": "object",
            "required": ["id_reserva"],
            "properties": {"id_reserva": {"type": "integer"}}
        });
        let args = SchemaExtractor::new().extract_arguments(
            &schema,
            "consulta la reserva con id reserva 77",
            "reservas_obtener",
        );
        assert_eq!(args["id_reserva"], json!(77));
    }

    #[test]
    fn test_untyped_property_defaults_to_string() {
        let schema = json!({"properties": {"destino": {"description": "Ciudad destino"}}});
        let args = SchemaExtractor::new().extract_arguments(
            &schema,
            "buscar vuelos con destino: Cartagena",
            "vuelos_buscar",
        );
        assert_eq!(args["destino"], json!("Cartagena"));
    }

    #[test]
    fn test_context_extraction_reads_history() {
        let schema = json!({
            "required": ["monto"],
            "properties": {"monto": {"type": "number"}}
        });
        let history = vec![("user".to_string(), "quiero pagar, monto: 250.5".to_string())];
        let args = SchemaExtractor::new().extract_arguments_with_context(
            &schema,
            "hazlo con tarjeta",
            &history,
            "pagos_crear",
        );
        assert_eq!(args["monto"], json!(250.5));
    }
}

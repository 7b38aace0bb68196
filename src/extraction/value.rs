// Typed value extraction from free text
//
// Values are pulled by type, not by keyword: every candidate of the field's
// type is collected, then the one closest to a mention of the field wins.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Number, Value};

use super::fuzzy::find_best_match;
use super::text::{char_len, char_offset, field_variations, fold_accents};
use crate::tools::schema::{properties_of, value_matches_type};

/// Texts shorter than this carry no extractable value
const MIN_TEXT_LEN: usize = 5;

/// Largest magnitude accepted for integer candidates (ids, phone numbers)
const MAX_INTEGER: i64 = 999_999_999_999_999;

/// Max char distance between a field mention and its value
const MAX_FIELD_DISTANCE: usize = 200;

const BOOLEAN_WORDS: &[(&str, bool)] = &[
    ("true", true),
    ("verdadero", true),
    ("si", true),
    ("sí", true),
    ("yes", true),
    ("1", true),
    ("activo", true),
    ("activa", true),
    ("false", false),
    ("falso", false),
    ("no", false),
    ("0", false),
    ("inactivo", false),
    ("inactiva", false),
];

/// Short filler phrases never taken as a string value
const FILLER_PHRASES: &[&str] = &[
    "con el",
    "de la",
    "del usuario",
    "con un",
    "un usuario",
    "una persona",
];

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

static INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+").expect("Failed to compile integer regex"));

static DECIMAL_RES: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"-?\d+\.\d+").expect("Failed to compile decimal regex"),
        Regex::new(r"-?\d+,\d+").expect("Failed to compile decimal regex"),
    ]
});

static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").expect("Failed to compile numeric regex"));

static QUOTED_RES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r#""([^"]*)""#).expect("Failed to compile quote regex"),
        Regex::new(r"'([^']*)'").expect("Failed to compile quote regex"),
        Regex::new(r"`([^`]*)`").expect("Failed to compile quote regex"),
    ]
});

static PROPER_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-ZÁÉÍÓÚÜÑ][a-záéíóúüñ]+(?:\s+[A-ZÁÉÍÓÚÜÑ][a-záéíóúüñ]+)*\b")
        .expect("Failed to compile name regex")
});

static WORD_SEQUENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[a-záéíóúüñ]+(?:\s+[a-záéíóúüñ]+){1,3}\b")
        .expect("Failed to compile word sequence regex")
});

static AFTER_PREPOSITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:con|de)\s+([a-záéíóúüñ]+(?:\s+[a-záéíóúüñ]+){1,3})(?:\s+(?:y|con|de|para)|[,\n]|$)",
    )
    .expect("Failed to compile preposition regex")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b{}\b", EMAIL_PATTERN)).expect("Failed to compile email regex")
});

static DATE_RES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"\d{4}-\d{2}-\d{2}").expect("Failed to compile date regex"),
        Regex::new(r"\d{2}/\d{2}/\d{4}").expect("Failed to compile date regex"),
        Regex::new(r"\d{2}-\d{2}-\d{4}").expect("Failed to compile date regex"),
    ]
});

static DATETIME_RES: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").expect("Failed to compile datetime regex"),
        Regex::new(r"\d{2}/\d{2}/\d{4}[T ]\d{2}:\d{2}:\d{2}").expect("Failed to compile datetime regex"),
    ]
});

static BOOLEAN_RES: Lazy<Vec<(Regex, bool)>> = Lazy::new(|| {
    BOOLEAN_WORDS
        .iter()
        .map(|(word, value)| {
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(word)))
                .expect("Failed to compile boolean regex");
            (re, *value)
        })
        .collect()
});

/// A possible value found in the text, positioned in chars
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCandidate {
    pub value: Value,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

impl ValueCandidate {
    fn new(value: Value, text: &str, start_byte: usize, end_byte: usize, confidence: f64) -> Self {
        Self {
            value,
            start: char_offset(text, start_byte),
            end: char_offset(text, end_byte),
            confidence,
        }
    }
}

/// Which candidate extractor a field uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateKind {
    Integer,
    Number,
    Text,
    Boolean,
    Email,
    Date,
    DateTime,
}

impl CandidateKind {
    /// `format` refines strings; otherwise the JSON type decides
    fn for_schema(field_type: &str, schema: &Value) -> Self {
        match (field_type, schema.get("format").and_then(Value::as_str)) {
            ("string", Some("email")) => CandidateKind::Email,
            ("string", Some("date")) => CandidateKind::Date,
            ("string", Some("date-time")) => CandidateKind::DateTime,
            ("integer", _) => CandidateKind::Integer,
            ("number", _) => CandidateKind::Number,
            ("boolean", _) => CandidateKind::Boolean,
            ("email", _) => CandidateKind::Email,
            ("date", _) => CandidateKind::Date,
            ("datetime", _) => CandidateKind::DateTime,
            _ => CandidateKind::Text,
        }
    }
}

/// Extracts typed values for schema fields out of user text
#[derive(Debug, Clone, Default)]
pub struct ValueExtractor;

impl ValueExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a value for `field_name` as described by `field_schema`
    pub fn extract_value(&self, text: &str, field_name: &str, field_schema: &Value) -> Option<Value> {
        if text.trim().chars().count() < MIN_TEXT_LEN || !field_schema.is_object() {
            return None;
        }

        let field_type = field_schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("string");

        if field_type == "object" {
            return self.extract_nested_object(field_schema, text);
        }

        let whole_text = text.trim().to_lowercase();
        let is_whole_text =
            |v: &Value| v.as_str().map(|s| s.to_lowercase() == whole_text).unwrap_or(false);

        if let Some(direct) = self.extract_near_field(text, field_name, field_type, field_schema) {
            let direct = clean_value(direct, field_type);
            if value_matches_type(&direct, field_type) && satisfies_constraints(&direct, field_schema) {
                if is_whole_text(&direct) {
                    return None;
                }
                return Some(direct);
            }
        }

        let candidates = self.candidates(CandidateKind::for_schema(field_type, field_schema), text);
        if candidates.is_empty() {
            return None;
        }

        let chosen = disambiguate(&candidates, field_name, text, field_schema).or_else(|| {
            if candidates.len() == 1 {
                Some(candidates[0].value.clone())
            } else {
                None
            }
        })?;

        let cleaned = clean_value(chosen, field_type);
        if is_whole_text(&cleaned) || !value_matches_type(&cleaned, field_type) {
            return None;
        }
        Some(cleaned)
    }

    /// Try the current text first, then the last three user messages, newest first
    pub fn extract_with_context(
        &self,
        text: &str,
        field_name: &str,
        field_schema: &Value,
        history: &[(String, String)],
    ) -> Option<Value> {
        if let Some(value) = self.extract_value(text, field_name, field_schema) {
            return Some(value);
        }

        let start = history.len().saturating_sub(3);
        history[start..]
            .iter()
            .rev()
            .filter(|(role, _)| role == "user")
            .find_map(|(_, content)| self.extract_value(content, field_name, field_schema))
    }

    /// Snap the extracted value onto the closest known option
    pub fn extract_with_fuzzy_matching(
        &self,
        text: &str,
        field_name: &str,
        field_schema: &Value,
        options: &[String],
    ) -> Option<Value> {
        let value = self.extract_value(text, field_name, field_schema)?;
        if options.is_empty() {
            return Some(value);
        }
        let term = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match find_best_match(&term, options) {
            Some(best) => Some(Value::String(best.to_string())),
            None => Some(value),
        }
    }

    fn extract_nested_object(&self, schema: &Value, text: &str) -> Option<Value> {
        let props = properties_of(schema)?;
        let mut out = Map::new();
        for (name, prop) in props {
            if let Some(value) = self.extract_value(text, name, prop) {
                out.insert(name.clone(), value);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(Value::Object(out))
        }
    }

    /// Look for `<field> [:=] <value>` using every spelling of the field
    fn extract_near_field(
        &self,
        text: &str,
        field_name: &str,
        field_type: &str,
        field_schema: &Value,
    ) -> Option<Value> {
        if field_name.is_empty() {
            return None;
        }
        let folded = fold_accents(text);

        for variation in field_variations(field_name) {
            let prefix = format!(r"\b{}\b\s*[:=]?\s*", regex::escape(&fold_accents(&variation)));

            let found = match field_type {
                "integer" => capture(&prefix, r"(-?\d+)", &folded)
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(Value::from),
                "number" => capture(&prefix, r"(-?\d+(?:[.,]\d+)?)", &folded)
                    .and_then(|s| s.replace(',', ".").parse::<f64>().ok())
                    .and_then(Number::from_f64)
                    .map(Value::Number),
                "boolean" => {
                    let alternatives = BOOLEAN_WORDS
                        .iter()
                        .map(|(w, _)| regex::escape(w))
                        .collect::<Vec<_>>()
                        .join("|");
                    capture(&prefix, &format!(r"\b({})\b", alternatives), &folded)
                        .and_then(|word| boolean_word(&word))
                        .map(Value::Bool)
                }
                "object" => return None,
                _ => capture(&prefix, r"([^\n,;]+)", &folded)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(Value::String),
            };
            if found.is_some() {
                return found;
            }

            if field_schema.get("format").and_then(Value::as_str) == Some("email") {
                if let Some(email) = capture(&prefix, &format!("({})", EMAIL_PATTERN), &folded) {
                    return Some(Value::String(email));
                }
            }
        }
        None
    }

    fn candidates(&self, kind: CandidateKind, text: &str) -> Vec<ValueCandidate> {
        match kind {
            CandidateKind::Integer => integer_candidates(text),
            CandidateKind::Number => number_candidates(text),
            CandidateKind::Text => string_candidates(text),
            CandidateKind::Boolean => boolean_candidates(text),
            CandidateKind::Email => pattern_candidates(std::slice::from_ref(&*EMAIL_RE), text, 1.0),
            CandidateKind::Date => pattern_candidates(&*DATE_RES, text, 0.9),
            CandidateKind::DateTime => pattern_candidates(&*DATETIME_RES, text, 0.9),
        }
    }
}

/// Case-insensitive `prefix + value_group` match; returns group 1
fn capture(prefix: &str, value_group: &str, text: &str) -> Option<String> {
    let re = RegexBuilder::new(&format!("{}{}", prefix, value_group))
        .case_insensitive(true)
        .build()
        .ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn boolean_word(word: &str) -> Option<bool> {
    let lower = word.trim().to_lowercase();
    BOOLEAN_WORDS
        .iter()
        .find(|(w, _)| *w == lower)
        .map(|(_, v)| *v)
}

fn integer_candidates(text: &str) -> Vec<ValueCandidate> {
    INTEGER_RE
        .find_iter(text)
        .filter_map(|m| {
            let n = m.as_str().parse::<i64>().ok()?;
            if n.abs() > MAX_INTEGER {
                return None;
            }
            Some(ValueCandidate::new(Value::from(n), text, m.start(), m.end(), 1.0))
        })
        .collect()
}

fn number_candidates(text: &str) -> Vec<ValueCandidate> {
    let mut candidates = Vec::new();
    for re in DECIMAL_RES.iter() {
        for m in re.find_iter(text) {
            if let Some(n) = m
                .as_str()
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
            {
                candidates.push(ValueCandidate::new(Value::Number(n), text, m.start(), m.end(), 1.0));
            }
        }
    }

    if candidates.is_empty() {
        for mut candidate in integer_candidates(text) {
            let as_float = candidate.value.as_f64().and_then(Number::from_f64);
            if let Some(n) = as_float {
                candidate.value = Value::Number(n);
                candidate.confidence = 0.9;
                candidates.push(candidate);
            }
        }
    }
    candidates
}

fn string_candidates(text: &str) -> Vec<ValueCandidate> {
    let mut candidates = Vec::new();
    let text_len = char_len(text);
    if char_len(text.trim()) <= MIN_TEXT_LEN {
        return candidates;
    }

    for re in QUOTED_RES.iter() {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = inner.as_str().trim();
            if char_len(value) >= 2 {
                candidates.push(ValueCandidate::new(
                    Value::String(value.to_string()),
                    text,
                    whole.start(),
                    whole.end(),
                    1.0,
                ));
            }
        }
    }
    if !candidates.is_empty() {
        return candidates;
    }

    let lower_text = text.to_lowercase();

    for m in PROPER_NAME_RE.find_iter(text) {
        let name = m.as_str();
        if name.to_lowercase() != lower_text && char_len(name) < text_len {
            candidates.push(ValueCandidate::new(
                Value::String(name.to_string()),
                text,
                m.start(),
                m.end(),
                0.7,
            ));
        }
    }

    for m in WORD_SEQUENCE_RE.find_iter(text) {
        let sequence = m.as_str();
        let lower = sequence.to_lowercase();
        let len = char_len(sequence);
        if len >= 6
            && !FILLER_PHRASES.contains(&lower.as_str())
            && lower != lower_text
            && (len as f64) < text_len as f64 * 0.5
        {
            candidates.push(ValueCandidate::new(
                Value::String(sequence.to_string()),
                text,
                m.start(),
                m.end(),
                0.5,
            ));
        }
    }

    for caps in AFTER_PREPOSITION_RE.captures_iter(text) {
        let Some(group) = caps.get(1) else { continue };
        let sequence = group.as_str();
        let len = char_len(sequence);
        if len >= 4 && sequence.to_lowercase() != lower_text && (len as f64) < text_len as f64 * 0.4 {
            candidates.push(ValueCandidate::new(
                Value::String(sequence.to_string()),
                text,
                group.start(),
                group.end(),
                0.6,
            ));
        }
    }

    candidates
}

fn boolean_candidates(text: &str) -> Vec<ValueCandidate> {
    let lower = text.to_lowercase();
    let mut candidates = Vec::new();
    for (re, value) in BOOLEAN_RES.iter() {
        for m in re.find_iter(&lower) {
            candidates.push(ValueCandidate::new(Value::Bool(*value), &lower, m.start(), m.end(), 0.9));
        }
    }
    candidates
}

fn pattern_candidates(patterns: &[Regex], text: &str, confidence: f64) -> Vec<ValueCandidate> {
    patterns
        .iter()
        .flat_map(|re| re.find_iter(text))
        .map(|m| {
            ValueCandidate::new(
                Value::String(m.as_str().to_string()),
                text,
                m.start(),
                m.end(),
                confidence,
            )
        })
        .collect()
}

/// Char positions where any spelling of the field occurs
fn field_positions(field_name: &str, text: &str) -> Vec<usize> {
    let folded = fold_accents(text).to_lowercase();
    let mut positions = Vec::new();
    for variation in field_variations(field_name) {
        let pattern = format!(r"\b{}\b", regex::escape(&fold_accents(&variation).to_lowercase()));
        if let Ok(re) = Regex::new(&pattern) {
            positions.extend(re.find_iter(&folded).map(|m| char_offset(&folded, m.start())));
        }
    }
    positions
}

/// Pick one candidate using constraints, proximity, confidence and order
///
/// Returns `None` when the field is never mentioned; callers fall back to a
/// sole candidate in that case.
pub fn disambiguate(
    candidates: &[ValueCandidate],
    field_name: &str,
    text: &str,
    field_schema: &Value,
) -> Option<Value> {
    if candidates.is_empty() {
        return None;
    }

    let mut pool: Vec<&ValueCandidate> = candidates
        .iter()
        .filter(|c| satisfies_constraints(&c.value, field_schema))
        .collect();
    if pool.is_empty() {
        pool = candidates.iter().collect();
    }

    let field_lower = field_name.to_lowercase();
    let without_field: Vec<&ValueCandidate> = pool
        .iter()
        .copied()
        .filter(|c| !value_text(&c.value).to_lowercase().contains(&field_lower))
        .collect();
    if !without_field.is_empty() {
        pool = without_field;
    }

    let positions = field_positions(field_name, text);
    if positions.is_empty() {
        return None;
    }

    let nearest = pool
        .iter()
        .flat_map(|c| positions.iter().map(move |p| (c.start.abs_diff(*p), *c)))
        .min_by_key(|(distance, _)| *distance);
    if let Some((distance, candidate)) = nearest {
        if distance < MAX_FIELD_DISTANCE {
            return Some(candidate.value.clone());
        }
    }

    let best_confidence = pool
        .iter()
        .map(|c| c.confidence)
        .fold(f64::MIN, f64::max);
    let best: Vec<&&ValueCandidate> = pool
        .iter()
        .filter(|c| c.confidence == best_confidence)
        .collect();
    if best.len() == 1 {
        return Some(best[0].value.clone());
    }

    pool.iter()
        .min_by_key(|c| c.start)
        .map(|c| c.value.clone())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a raw value towards the field's JSON type
pub fn clean_value(value: Value, field_type: &str) -> Value {
    match field_type {
        "string" => {
            let s = value_text(&value);
            let trimmed = s
                .trim()
                .trim_matches(|c: char| matches!(c, ' ' | ',' | '.' | ';' | ':' | ')' | '}' | ']'));
            Value::String(trimmed.to_string())
        }
        "integer" | "number" => {
            let raw = value_text(&value);
            let Some(m) = NUMERIC_RE.find(&raw) else {
                return value;
            };
            if field_type == "integer" {
                m.as_str()
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or(value)
            } else {
                m.as_str()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(value)
            }
        }
        "boolean" => match value_text(&value).trim().to_lowercase().as_str() {
            "true" | "sí" | "si" | "1" => Value::Bool(true),
            "false" | "no" | "0" => Value::Bool(false),
            _ => value,
        },
        "array" => match value {
            Value::Array(_) => value,
            other => Value::Array(vec![other]),
        },
        _ => value,
    }
}

/// Check `enum`, `minimum`/`maximum`, `minLength`/`maxLength` and `pattern`
pub fn satisfies_constraints(value: &Value, schema: &Value) -> bool {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return false;
        }
    }

    if let Some(n) = value.as_f64().filter(|_| value.is_number()) {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return false;
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return false;
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = char_len(s) as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                return false;
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                return false;
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            // Anchored at the start only; an invalid pattern constrains nothing
            if let Ok(re) = Regex::new(&format!("^(?:{})", pattern)) {
                if !re.is_match(s) {
                    return false;
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor() -> ValueExtractor {
        ValueExtractor::new()
    }

    #[test]
    fn test_short_text_yields_nothing() {
        assert_eq!(extractor().extract_value("hola", "id", &json!({"type": "integer"})), None);
    }

    #[test]
    fn test_near_field_integer() {
        let value = extractor().extract_value(
            "crea un avion con capacidad: 180 pasajeros",
            "capacidad",
            &json!({"type": "integer"}),
        );
        assert_eq!(value, Some(json!(180)));
    }

    #[test]
    fn test_near_field_number_with_comma() {
        let value = extractor().extract_value(
            "registra un pago con monto 150,75 en efectivo",
            "monto",
            &json!({"type": "number"}),
        );
        assert_eq!(value, Some(json!(150.75)));
    }

    #[test]
    fn test_near_field_snake_case_variation() {
        let value = extractor().extract_value(
            "reserva para el id vuelo: AV123, asiento 4B",
            "id_vuelo",
            &json!({"type": "string"}),
        );
        assert_eq!(value, Some(json!("AV123")));
    }

    #[test]
    fn test_near_field_accent_insensitive() {
        let value = extractor().extract_value(
            "crear avion con aerolínea Avianca, modelo A320",
            "aerolinea",
            &json!({"type": "string"}),
        );
        assert_eq!(value, Some(json!("Avianca")));
    }

    #[test]
    fn test_near_field_boolean() {
        let value = extractor().extract_value(
            "actualiza el usuario con activo: si por favor",
            "activo",
            &json!({"type": "boolean"}),
        );
        assert_eq!(value, Some(json!(true)));
    }

    #[test]
    fn test_enum_constraint_filters_candidates() {
        let schema = json!({"type": "string", "enum": ["CONFIRMADA"]});
        let value = extractor().extract_value(
            r#"pon estado "CONFIRMADA" no "PENDIENTE""#,
            "estado",
            &schema,
        );
        assert_eq!(value, Some(json!("CONFIRMADA")));
    }

    #[test]
    fn test_single_integer_candidate_without_field_mention() {
        let value = extractor().extract_value(
            "muestrame la reserva 42 por favor",
            "id",
            &json!({"type": "integer"}),
        );
        assert_eq!(value, Some(json!(42)));
    }

    #[test]
    fn test_multiple_candidates_without_mention_is_ambiguous() {
        let value = extractor().extract_value(
            "tengo 3 maletas y 2 mochilas",
            "id",
            &json!({"type": "integer"}),
        );
        assert_eq!(value, None);
    }

    #[test]
    fn test_quoted_string_candidate() {
        let value = extractor().extract_value(
            r#"busca al pasajero "Laura Gómez" en el sistema"#,
            "usuario",
            &json!({"type": "string"}),
        );
        assert_eq!(value, Some(json!("Laura Gómez")));
    }

    #[test]
    fn test_email_format_candidate() {
        let value = extractor().extract_value(
            "envia la notificacion a laura@example.com hoy",
            "destino",
            &json!({"type": "string", "format": "email"}),
        );
        assert_eq!(value, Some(json!("laura@example.com")));
    }

    #[test]
    fn test_nested_object_extraction() {
        let schema = json!({
            "type": "object",
            "properties": {
                "capacidad": {"type": "integer"},
                "modelo": {"type": "string"}
            }
        });
        let value = extractor()
            .extract_value("registrar avion modelo: A320, capacidad 180", "avion", &schema)
            .unwrap();
        assert_eq!(value["capacidad"], json!(180));
        assert_eq!(value["modelo"], json!("A320"));
    }

    #[test]
    fn test_extract_with_context_uses_history() {
        let history = vec![
            ("user".to_string(), "el monto es 99.5 dolares".to_string()),
            ("assistant".to_string(), "Para continuar, necesito: metodo_pago".to_string()),
        ];
        let value = extractor().extract_with_context(
            "con tarjeta de credito",
            "monto",
            &json!({"type": "number"}),
            &history,
        );
        assert_eq!(value, Some(json!(99.5)));
    }

    #[test]
    fn test_fuzzy_matching_snaps_to_option() {
        let options = vec!["TARJETA_CREDITO".to_string(), "EFECTIVO".to_string()];
        let value = extractor().extract_with_fuzzy_matching(
            "el metodo: efectivo gracias",
            "metodo",
            &json!({"type": "string"}),
            &options,
        );
        assert_eq!(value, Some(json!("EFECTIVO")));
    }

    #[test]
    fn test_clean_value() {
        assert_eq!(clean_value(json!("  Bogotá, "), "string"), json!("Bogotá"));
        assert_eq!(clean_value(json!("12 personas"), "integer"), json!(12));
        assert_eq!(clean_value(json!("si"), "boolean"), json!(true));
        assert_eq!(clean_value(json!("x"), "array"), json!(["x"]));
    }

    #[test]
    fn test_constraints() {
        let schema = json!({"minimum": 1, "maximum": 10, "minLength": 2, "pattern": "[A-Z]+"});
        assert!(satisfies_constraints(&json!(5), &schema));
        assert!(!satisfies_constraints(&json!(11), &schema));
        assert!(satisfies_constraints(&json!("AB"), &schema));
        assert!(!satisfies_constraints(&json!("ab"), &schema));
        assert!(!satisfies_constraints(&json!("A"), &schema));
    }

    #[test]
    fn test_disambiguate_prefers_nearest_to_field() {
        let text = "vuelo 100 y luego la capacidad 180";
        let candidates = integer_candidates(text);
        let chosen = disambiguate(&candidates, "capacidad", text, &json!({"type": "integer"}));
        assert_eq!(chosen, Some(json!(180)));
    }
}

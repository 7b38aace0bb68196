// Argument extraction from free text
//
// Rule-based: regex candidates per JSON type, scored by proximity to the
// field name, shaped by the tool schema.

pub mod fuzzy;
pub mod schema;
pub mod text;
pub mod value;

pub use fuzzy::find_best_match;
pub use schema::SchemaExtractor;
pub use value::{ValueCandidate, ValueExtractor};

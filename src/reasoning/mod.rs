// LLM reasoning: intent analysis over function calling

pub mod engine;
pub mod function_calling;
pub mod json_repair;
pub mod prompts;
pub mod types;

pub use engine::ReasoningEngine;
pub use function_calling::to_function_declarations;
pub use json_repair::{extract_first_json, safe_parse_json, JsonRepairError};
pub use types::{ActionType, ReasoningResult};

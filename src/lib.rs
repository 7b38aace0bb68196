// Aerodesk - natural-language agent over airline MCP tools
// Library exports

pub mod agent; // Reasoning loop, sessions and memory
pub mod config;
pub mod errors; // API error codes
pub mod extraction; // Rule-based argument extraction
pub mod providers; // LLM provider (Gemini)
pub mod reasoning;
pub mod selection; // Embedding-based tool ranking
pub mod server; // HTTP API
pub mod tools; // Tool manager, registry and MCP client

// Tool system: schemas, semantic registry, execution and the MCP client

pub mod manager;
pub mod mcp;
pub mod registry;
pub mod schema;
pub mod tfidf;
pub mod types;

pub use manager::{normalize_arguments, validate_arguments, ToolManager, ToolStats};
pub use registry::{RegistryStats, ScoredTool, SemanticRegistry, ToolEntry};
pub use schema::{Layout, SchemaAnalysis};
pub use types::{ExecutionContext, ExecutionResult, ExecutionStatus, ToolDefinition, ToolHandler};

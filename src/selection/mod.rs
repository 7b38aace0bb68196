// Semantic tool selection: embeddings, cache and ranking

pub mod embeddings;
pub mod selector;

pub use embeddings::{EmbeddingCache, EmbeddingIndex, EmbeddingProvider, GeminiEmbedder};
pub use selector::{schema_match_score, Decision, RankedTool, SemanticSelector, Thresholds};

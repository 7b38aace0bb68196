// Conversational agent: sessions, memory, planning and the reasoning loop

pub mod core;
pub mod memory;
pub mod planner;
pub mod response;
pub mod session;

pub use self::core::AgentCore;
pub use memory::{MemoryContext, MemoryMessage};
pub use planner::DependencyPlanner;
pub use response::{AgentResponse, AgentStatus};
pub use session::{AgentSession, SessionManager, SessionStats, SharedSession};

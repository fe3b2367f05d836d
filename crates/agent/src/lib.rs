//! The agent runtime core: the message-driven iteration loop, the
//! summarize/flush pipeline, and the agent-level tools.

mod agent;
mod summarizer;
mod tools;

pub use agent::{Agent, DirectOptions};
pub use summarizer::Summarizer;
pub use tools::{
    register_agent_tools, CronTool, MemorySaveTool, MemorySearchTool, SpawnAgentTool,
};

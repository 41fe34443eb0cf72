//! Agent Runner adapters: the concrete implementations of the
//! `AgentRunner` port.

pub mod claude_cli;
pub mod mock;

pub use claude_cli::{ClaudeCliConfig, ClaudeCliRunner};
pub use mock::ScriptedAgentRunner;

//! Core types and the agent loop for Axe.
//!
//! This crate holds the conversation data model (messages made of content
//! blocks), the callback surfaces the wire layer and tool layer plug into,
//! and the agent loop itself: streaming rounds, tool execution, budget
//! enforcement, and automatic context compaction.

pub mod agent;
pub mod error;
pub mod input;
pub mod types;

pub use agent::{Agent, AgentLlmClient, Budget, StreamCallbacks, ToolDispatcher};
pub use error::{AgentError, ToolError};
pub use types::{ContentBlock, ImageSource, Message, Response, Role, ToolDef, Usage};

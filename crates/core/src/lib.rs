//! # Chatforge Core
//!
//! Domain types, traits, and error definitions for the chatforge chat back-end.
//! This crate has **no framework dependencies**: it defines the model that
//! every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (storage, memory, vector search, web search,
//! file extraction, one-shot completion) is a trait here. Implementations live
//! in their respective crates, which keeps the turn pipeline testable with
//! in-memory stand-ins.

pub mod completion;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod request;
pub mod search;
pub mod skill;
pub mod storage;
pub mod stream;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use completion::Completer;
pub use error::{ChatError, ErrorKind, Result, StorageError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryRecord, MemoryStore, RetrievalChunk, VectorStore};
pub use message::{Attachment, Message, MessageStatus, MessageTree, Role};
pub use request::{
    ReasoningEffort, ReasoningMode, ReasoningRequest, SamplingParams, ToolDeclaration,
    UnifiedChatRequest,
};
pub use search::{WebSearch, WebSearchResult};
pub use skill::{Skill, SkillResource};
pub use storage::{FileExtractor, Session, Storage};
pub use stream::{StreamUsage, UnifiedStreamEvent};
pub use tool::{Tool, ToolCall, ToolContext, ToolOutput};
pub use turn::{OrchestratorResult, PostProcessingResult};

//! # Chatforge Engine
//!
//! The turn pipeline. A [`TurnController`] takes one validated
//! [`ChatRequest`] through context gathering ([`TaskOrchestrator`]), context
//! assembly ([`ContextAssembler`]), the streaming tool loop and persistence,
//! then hands the finished exchange to the post-processing pool.

pub mod completion;
pub mod context;
pub mod orchestrator;
pub mod post_processing;
pub mod request;
pub mod tools_builder;
pub mod turn;

pub use completion::AdapterCompleter;
pub use context::{AssembledContext, AssemblyOptions, ContextAssembler};
pub use orchestrator::{GatherFlags, GatherRequest, TaskOrchestrator};
pub use post_processing::{PostProcessJob, PostProcessingQueue, PostProcessor};
pub use request::{AdvancedSettings, ChatRequest, SearchSourceKind, WebSearchSource};
pub use tools_builder::{TurnTools, build_turn_tools};
pub use turn::{TurnController, TurnOutcome, TurnSink};

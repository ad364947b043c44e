//! Protocol adapters for chatforge.
//!
//! Every provider family implements [`ProtocolAdapter`]. The registry binds
//! adapters to configured provider ids; the transport moves bytes; the
//! normalizers turn provider-native usage and error shapes into the unified
//! model.

pub mod adapter;
pub mod anthropic;
pub mod errors;
pub mod gemini;
pub mod openai;
pub mod reasoning;
pub mod registry;
pub mod sse;
pub mod transport;
pub mod usage;

pub use adapter::{
    CollectedResponse, ConnectivityCheck, ModelInfo, ProtocolAdapter, ProviderSettings,
    StreamState, WireRequest, collect,
};
pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use registry::{AdapterRegistry, ProviderHandle, ProviderKind, build_from_config};
pub use sse::{SseDecoder, SseFrame};
pub use transport::{FrameReceiver, HttpTransport, Transport};

//! Core abstractions for agent chat sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Event` / `EventLog` - Persisted history and derived display messages
//! - `ChatConfig` - Validated runtime configuration
//! - `MessageStream` - History + live stream merged into one view
//! - Backend, transport, coordinator and location traits

pub mod config;
pub mod event;
pub mod message_stream;
pub mod traits;

pub use config::{ChatConfig, ConfigError};
pub use event::{
    AgentId, Event, EventKind, EventLog, EventSource, Message, MessageBody, SessionId, ToolCall,
    derive_messages,
};
pub use message_stream::MessageStream;
pub use traits::{
    ApiError, ChunkStream, CreateSessionRequest, EventPatch, LiveView, Location, SessionApi,
    StreamChunk, StreamCoordinator, StreamTransport,
};
